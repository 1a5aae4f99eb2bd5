//! Binary phone backup container.
//!
//! All integers are little-endian:
//!
//! ```text
//! header  : "CBAK" | version u16 | section count u16
//! section : id [u8; 4] | payload length u32 | payload
//! ```
//!
//! `META` holds two u16-prefixed strings (model, timestamp), `CONT` a u32
//! count of u32-prefixed vCard 2.1 records, `ORGZ` `NOTE` `SMS_` `SMSA` and
//! `CALL` are u32-counted lists of u32-prefixed strings, `PROF` is opaque.

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use super::vcard::{self, CardOptions, CardVersion};
use super::{extension_of, read_head, Codec, Diagnostics};
use crate::contact::{BackupExtra, ContactList, RawSection};
use crate::error::CodecError;
use crate::vdir;

pub const MAGIC: &[u8; 4] = b"CBAK";
pub const CONTAINER_VERSION: u16 = 1;
const EXTENSION: &str = "cbk";

const META: [u8; 4] = *b"META";
const CONT: [u8; 4] = *b"CONT";
const ORGZ: [u8; 4] = *b"ORGZ";
const NOTE: [u8; 4] = *b"NOTE";
const SMS: [u8; 4] = *b"SMS_";
const SMSA: [u8; 4] = *b"SMSA";
const CALL: [u8; 4] = *b"CALL";
const PROF: [u8; 4] = *b"PROF";

const KNOWN_SECTIONS: [[u8; 4]; 8] = [META, CONT, ORGZ, NOTE, SMS, SMSA, CALL, PROF];

pub(crate) fn looks_like_backup(head: &[u8], extension: Option<&str>) -> bool {
    head.starts_with(MAGIC) || extension.is_some_and(|ext| ext.eq_ignore_ascii_case(EXTENSION))
}

fn section_name(id: &[u8; 4]) -> String {
    String::from_utf8_lossy(id).into_owned()
}

/// Bounds-checked cursor over a byte buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, pos: 0, what }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                format!(
                    "Corrupt backup: {} length {len} at offset {} overruns its buffer",
                    self.what, self.pos
                )
            })?;
        let buf: &'a [u8] = self.buf;
        let slice = &buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, String> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn id(&mut self) -> Result<[u8; 4], String> {
        let b = self.take(4)?;
        Ok([b[0], b[1], b[2], b[3]])
    }

    fn short_string(&mut self) -> Result<String, String> {
        let len = self.u16()? as usize;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    fn long_bytes(&mut self) -> Result<&'a [u8], String> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn string_list(&mut self) -> Result<Vec<String>, String> {
        let count = self.u32()?;
        let mut out = Vec::new();
        for _ in 0..count {
            out.push(String::from_utf8_lossy(self.long_bytes()?).into_owned());
        }
        Ok(out)
    }
}

fn read_sections(bytes: &[u8]) -> Result<Vec<([u8; 4], &[u8])>, String> {
    let mut header = Reader::new(bytes, "header");
    let magic = header
        .take(MAGIC.len())
        .map_err(|_| "Not a backup file: truncated header".to_string())?;
    if magic != MAGIC {
        return Err("Not a backup file: bad signature".to_string());
    }
    let version = header.u16()?;
    if version != CONTAINER_VERSION {
        return Err(format!("Unsupported backup version: {version}"));
    }
    let count = header.u16()?;
    let mut sections = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = header.id()?;
        header.what = "section";
        let payload = header.long_bytes()?;
        sections.push((id, payload));
    }
    if !header.is_empty() {
        return Err(format!(
            "Corrupt backup: {} trailing bytes after the last section",
            bytes.len() - header.pos
        ));
    }
    Ok(sections)
}

#[derive(Debug, Default)]
pub struct BackupFormat {
    options: CardOptions,
    diag: Diagnostics,
}

impl BackupFormat {
    pub fn new(options: CardOptions) -> Self {
        Self {
            options,
            diag: Diagnostics::default(),
        }
    }

    fn parse(&mut self, bytes: &[u8], list: &mut ContactList) -> Result<(), String> {
        let mut extra = BackupExtra::default();
        let mut profile = Vec::new();

        for (id, payload) in read_sections(bytes)? {
            extra.section_order.push(id);
            match id {
                META => {
                    let mut r = Reader::new(payload, "META entry");
                    extra.model = r.short_string()?;
                    extra.time_stamp = r.short_string()?;
                }
                CONT => {
                    let mut r = Reader::new(payload, "CONT record");
                    let count = r.u32()?;
                    for index in 1..=count {
                        let text = String::from_utf8_lossy(r.long_bytes()?).into_owned();
                        let mut record_diag = Diagnostics::default();
                        let items = vcard::parse_cards(&text, &mut record_diag);
                        if items.is_empty() {
                            self.diag.record(None, format!("record {index}: no vCard data"));
                        }
                        self.diag.absorb(record_diag, &format!("record {index}: "));
                        list.items.extend(items);
                    }
                }
                ORGZ => extra.organizer = Reader::new(payload, "ORGZ entry").string_list()?,
                NOTE => extra.notes = Reader::new(payload, "NOTE entry").string_list()?,
                SMS => extra.sms = Reader::new(payload, "SMS_ entry").string_list()?,
                SMSA => extra.sms_archive = Reader::new(payload, "SMSA entry").string_list()?,
                CALL => extra.calls = Reader::new(payload, "CALL entry").string_list()?,
                PROF => profile = payload.to_vec(),
                _ => {
                    self.diag.record(
                        None,
                        format!("Unsupported backup section: {}", section_name(&id)),
                    );
                    extra.unknown_sections.push(RawSection {
                        id,
                        payload: payload.to_vec(),
                    });
                }
            }
        }

        // Appending keeps the device data already in the list.
        if list.extra.is_empty() {
            list.extra = extra;
        }
        if list.original_profile.is_empty() {
            list.original_profile = profile;
        }
        Ok(())
    }

    fn section_payload(&self, id: [u8; 4], list: &ContactList) -> Result<Vec<u8>, String> {
        let extra = &list.extra;
        let mut out = Vec::new();
        match id {
            META => {
                put_short_string(&mut out, &extra.model, "META model")?;
                put_short_string(&mut out, &extra.time_stamp, "META timestamp")?;
            }
            CONT => {
                put_count(&mut out, list.len(), "CONT")?;
                for item in list.iter() {
                    let card = vcard::write_card(item, CardVersion::V21, &self.options);
                    put_long_bytes(&mut out, card.as_bytes(), "CONT record")?;
                }
            }
            ORGZ => put_string_list(&mut out, &extra.organizer, "ORGZ")?,
            NOTE => put_string_list(&mut out, &extra.notes, "NOTE")?,
            SMS => put_string_list(&mut out, &extra.sms, "SMS_")?,
            SMSA => put_string_list(&mut out, &extra.sms_archive, "SMSA")?,
            CALL => put_string_list(&mut out, &extra.calls, "CALL")?,
            PROF => out.extend_from_slice(&list.original_profile),
            _ => {}
        }
        Ok(out)
    }

    /// Sections in read order, then any known section not seen yet.
    fn serialize(&self, list: &ContactList) -> Result<Vec<u8>, String> {
        let extra = &list.extra;
        let mut sections: Vec<([u8; 4], Vec<u8>)> = Vec::new();
        let mut unknown = extra.unknown_sections.iter().peekable();

        for id in &extra.section_order {
            if KNOWN_SECTIONS.contains(id) {
                if !sections.iter().any(|(seen, _)| seen == id) {
                    sections.push((*id, self.section_payload(*id, list)?));
                }
            } else if let Some(raw) = unknown.next_if(|raw| raw.id == *id) {
                sections.push((raw.id, raw.payload.clone()));
            }
        }
        for raw in unknown {
            sections.push((raw.id, raw.payload.clone()));
        }
        for id in KNOWN_SECTIONS {
            if !sections.iter().any(|(seen, _)| *seen == id) {
                sections.push((id, self.section_payload(id, list)?));
            }
        }

        let count = u16::try_from(sections.len())
            .map_err(|_| format!("Too many backup sections: {}", sections.len()))?;
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&CONTAINER_VERSION.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        for (id, payload) in sections {
            let len = u32::try_from(payload.len()).map_err(|_| {
                format!("Backup section {} is too large", section_name(&id))
            })?;
            out.extend_from_slice(&id);
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(&payload);
        }
        Ok(out)
    }
}

fn put_short_string(out: &mut Vec<u8>, value: &str, what: &str) -> Result<(), String> {
    let len = u16::try_from(value.len())
        .map_err(|_| format!("{what} is too long for a backup: {} bytes", value.len()))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn put_count(out: &mut Vec<u8>, count: usize, what: &str) -> Result<(), String> {
    let count = u32::try_from(count).map_err(|_| format!("Too many {what} entries: {count}"))?;
    out.extend_from_slice(&count.to_le_bytes());
    Ok(())
}

fn put_long_bytes(out: &mut Vec<u8>, bytes: &[u8], what: &str) -> Result<(), String> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| format!("{what} is too long for a backup: {} bytes", bytes.len()))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

fn put_string_list(out: &mut Vec<u8>, values: &[String], section: &str) -> Result<(), String> {
    put_count(out, values.len(), section)?;
    for value in values {
        put_long_bytes(out, value.as_bytes(), &format!("{section} entry"))?;
    }
    Ok(())
}

impl Codec for BackupFormat {
    fn detect(path: &Path) -> bool {
        path.is_file()
            && read_head(path)
                .is_some_and(|head| looks_like_backup(&head, extension_of(path).as_deref()))
    }

    fn import_records(
        &mut self,
        source: &Path,
        list: &mut ContactList,
        append: bool,
    ) -> Result<(), CodecError> {
        self.diag.clear();
        if !append {
            list.clear();
        }
        let bytes = fs::read(source).map_err(|err| {
            self.diag
                .fatal(format!("Can't read file {}: {err}", source.display()))
        })?;
        let before = list.len();
        if let Err(message) = self.parse(&bytes, list) {
            list.truncate(before);
            return Err(self.diag.fatal(message));
        }
        debug!(sections = ?list.extra.section_order.iter().map(section_name).collect::<Vec<_>>(), "backup sections");
        info!(records = list.len() - before, path = %source.display(), "backup read");
        Ok(())
    }

    fn export_records(&mut self, dest: &Path, list: &ContactList) -> Result<(), CodecError> {
        self.diag.clear();
        let bytes = self
            .serialize(list)
            .map_err(|message| self.diag.fatal(message))?;
        vdir::write_atomic(dest, &bytes).map_err(|err| {
            self.diag
                .fatal(format!("Can't write file {}: {err:#}", dest.display()))
        })?;
        info!(records = list.len(), path = %dest.display(), "backup written");
        Ok(())
    }

    fn diagnostics(&self) -> &Diagnostics {
        &self.diag
    }
}
