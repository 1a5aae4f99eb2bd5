//! Single-file vCard codec.

use std::fs;
use std::path::Path;

use tracing::info;

use super::vcard::{self, CardOptions};
use super::{extension_of, read_head, Codec, Diagnostics};
use crate::contact::ContactList;
use crate::error::CodecError;
use crate::vdir;

const EXTENSIONS: &[&str] = &["vcf", "vcard"];

/// Card text recognized by extension or by a leading `BEGIN:VCARD`.
pub(crate) fn looks_like_cards(head: &[u8], extension: Option<&str>) -> bool {
    if extension.is_some_and(|ext| EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e))) {
        return true;
    }
    let head = head.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(head);
    let start = head
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(head.len());
    head[start..]
        .get(..11)
        .is_some_and(|tag| tag.eq_ignore_ascii_case(b"BEGIN:VCARD"))
}

/// Decode file bytes, falling back to lossy decoding with a record error.
pub(crate) fn decode_text(bytes: Vec<u8>, diag: &mut Diagnostics) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            diag.record(None, "File is not valid UTF-8, undecodable bytes replaced");
            String::from_utf8_lossy(err.as_bytes()).into_owned()
        }
    }
}

#[derive(Debug, Default)]
pub struct VcfFormat {
    options: CardOptions,
    diag: Diagnostics,
}

impl VcfFormat {
    pub fn new(options: CardOptions) -> Self {
        Self {
            options,
            diag: Diagnostics::default(),
        }
    }
}

impl Codec for VcfFormat {
    fn detect(path: &Path) -> bool {
        path.is_file()
            && read_head(path)
                .is_some_and(|head| looks_like_cards(&head, extension_of(path).as_deref()))
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
        let text = decode_text(bytes, &mut self.diag);
        let items = vcard::parse_cards(&text, &mut self.diag);
        info!(records = items.len(), path = %source.display(), "vCard file read");
        list.items.extend(items);
        Ok(())
    }

    fn export_records(&mut self, dest: &Path, list: &ContactList) -> Result<(), CodecError> {
        self.diag.clear();
        let text = vcard::write_cards(list.iter(), &self.options);
        vdir::write_atomic(dest, text.as_bytes()).map_err(|err| {
            self.diag
                .fatal(format!("Can't write file {}: {err:#}", dest.display()))
        })?;
        info!(records = list.len(), path = %dest.display(), "vCard file written");
        Ok(())
    }

    fn diagnostics(&self) -> &Diagnostics {
        &self.diag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::ContactItem;
    use crate::format::{CardVersion, VersionPolicy};

    #[test]
    fn recognizes_card_text() {
        assert!(looks_like_cards(b"  \r\nBEGIN:VCARD", None));
        assert!(looks_like_cards(b"", Some("VCF")));
        assert!(!looks_like_cards(b"BEGIN:VCAL", None));
        assert!(!looks_like_cards(b"CBAK", Some("cbk")));
    }

    #[test]
    fn import_appends_or_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.vcf");
        fs::write(&path, "BEGIN:VCARD\nVERSION:3.0\nFN:One\nEND:VCARD\n").unwrap();

        let mut codec = VcfFormat::default();
        let mut list = ContactList::from(vec![ContactItem::default()]);
        codec.import_records(&path, &mut list, true).unwrap();
        assert_eq!(list.len(), 2);
        codec.import_records(&path, &mut list, false).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].full_name, "One");
        assert!(codec.errors().is_empty());
    }

    #[test]
    fn missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut codec = VcfFormat::default();
        let mut list = ContactList::new();
        let err = codec
            .import_records(&dir.path().join("nope.vcf"), &mut list, false)
            .unwrap_err();
        assert!(matches!(err, CodecError::Fatal(_)));
        assert!(codec.fatal_error().unwrap().starts_with("Can't read file"));
    }

    #[test]
    fn export_then_import_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.vcf");
        fs::write(
            &src,
            "BEGIN:VCARD\r\nVERSION:2.1\r\nN:Smith;John\r\nTEL;CELL:123\r\nEND:VCARD\r\n\
BEGIN:VCARD\r\nVERSION:3.0\r\nFN:Jane\r\nEMAIL;TYPE=WORK:j@x.org\r\nEND:VCARD\r\n",
        )
        .unwrap();

        let options = CardOptions {
            preferred_version: CardVersion::V30,
            ..Default::default()
        }
        .with_policy(VersionPolicy::AsDetected);
        let mut codec = VcfFormat::new(options);
        let mut first = ContactList::new();
        codec.import_records(&src, &mut first, false).unwrap();

        let out = dir.path().join("out.vcf");
        codec.export_records(&out, &first).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), fs::read_to_string(&src).unwrap());

        let mut second = ContactList::new();
        codec.import_records(&out, &mut second, false).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn invalid_utf8_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.vcf");
        fs::write(&path, b"BEGIN:VCARD\nFN:Bad \xFF name\nEND:VCARD\n").unwrap();
        let mut codec = VcfFormat::default();
        let mut list = ContactList::new();
        codec.import_records(&path, &mut list, false).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(codec.errors().len(), 1);
        assert!(codec.fatal_error().is_none());
    }
}
