//! vCard 2.1 / 3.0 text grammar shared by every card-based codec.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use super::Diagnostics;
use crate::contact::{ContactItem, DateFormat, DateItem, PostalAddress, TagValue};
use crate::typed::TypedValue;

const BEGIN_VCARD: &str = "BEGIN:VCARD";
const END_VCARD: &str = "END:VCARD";

/// Provenance label stored in `ContactItem::original_format`.
pub const ORIGINAL_FORMAT: &str = "vCard";

const FOLD_LIMIT: usize = 75;

// Recognized but not modelled; kept verbatim in `other_tags`.
const OTHER_TAGS: &[&str] = &[
    "PRODID",
    "REV",
    "CATEGORIES",
    "LABEL",
    "GEO",
    "TZ",
    "ROLE",
    "MAILER",
    "KEY",
    "LOGO",
    "SOUND",
    "AGENT",
    "CLASS",
    "NAME",
    "PROFILE",
    "SOURCE",
    "X-GROUP-MEMBERSHIP",
    "X-PHONETIC-FIRST-NAME",
    "X-PHONETIC-LAST-NAME",
];

// Modelled once per record; later occurrences are kept in `other_tags`.
const SINGULAR_TAGS: &[&str] = &[
    "UID",
    "N",
    "FN",
    "NICKNAME",
    "TITLE",
    "NOTE",
    "SORT-STRING",
    "URL",
    "ORG",
    "BDAY",
    "PHOTO",
];

// Messenger tags and the type they imply.
const MESSENGER_TAGS: &[(&str, Option<&str>)] = &[
    ("X-JABBER", Some("xmpp")),
    ("X-ICQ", Some("icq")),
    ("X-SKYPE", Some("skype")),
    ("X-SKYPE-USERNAME", Some("skype")),
    ("IMPP", None),
];

// Preferred export tag per implied messenger type.
const MESSENGER_EXPORT: &[(&str, &str)] = &[
    ("xmpp", "X-JABBER"),
    ("icq", "X-ICQ"),
    ("skype", "X-SKYPE-USERNAME"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CardVersion {
    #[default]
    V21,
    V30,
}

impl CardVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            CardVersion::V21 => "2.1",
            CardVersion::V30 => "3.0",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "2.1" => Some(CardVersion::V21),
            "3.0" => Some(CardVersion::V30),
            _ => None,
        }
    }
}

/// Which card version to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionPolicy {
    Legacy,
    Current,
    /// Each record's own version, falling back to the preferred one.
    #[default]
    AsDetected,
}

/// Card settings threaded into every card-based codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CardOptions {
    pub policy: VersionPolicy,
    pub preferred_version: CardVersion,
    pub skip_time_from_date: bool,
}

impl CardOptions {
    pub fn with_policy(mut self, policy: VersionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn version_for(&self, item: &ContactItem) -> CardVersion {
        match self.policy {
            VersionPolicy::Legacy => CardVersion::V21,
            VersionPolicy::Current => CardVersion::V30,
            VersionPolicy::AsDetected => {
                CardVersion::parse(&item.version).unwrap_or(self.preferred_version)
            }
        }
    }
}

/// One physical line and its 1-based position in the source.
#[derive(Debug, Clone)]
struct RawLine {
    line: usize,
    text: String,
}

#[derive(Debug)]
struct CardLines {
    begin: usize,
    lines: Vec<RawLine>,
}

/// Parse every record in `content`. Malformed parts are reported to `diag`
/// and skipped; parsing never stops early.
pub fn parse_cards(content: &str, diag: &mut Diagnostics) -> Vec<ContactItem> {
    split_cards(content, diag)
        .into_iter()
        .map(|card| parse_card(card, diag))
        .collect()
}

fn split_cards(content: &str, diag: &mut Diagnostics) -> Vec<CardLines> {
    let content = content.trim_start_matches('\u{feff}');
    let mut cards: Vec<CardLines> = Vec::new();
    let mut current: Option<CardLines> = None;

    for (idx, raw_line) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim_end_matches('\r');
        let marker = line.trim();

        if marker.eq_ignore_ascii_case(BEGIN_VCARD) {
            if let Some(open) = current.take() {
                diag.record(Some(line_no), format!("Unclosed record before line {line_no}"));
                cards.push(open);
            }
            current = Some(CardLines {
                begin: line_no,
                lines: Vec::new(),
            });
            continue;
        }

        let Some(open) = current.as_mut() else {
            continue;
        };
        if marker.eq_ignore_ascii_case(END_VCARD) {
            if let Some(done) = current.take() {
                cards.push(done);
            }
            continue;
        }
        open.lines.push(RawLine {
            line: line_no,
            text: line.to_string(),
        });
    }

    if let Some(open) = current {
        diag.record(None, "Last section not closed");
        cards.push(open);
    }

    cards
}

fn unfold_lines(lines: Vec<RawLine>) -> Vec<RawLine> {
    let mut unfolded: Vec<RawLine> = Vec::new();
    for line in lines {
        if let Some(last) = unfolded.last_mut() {
            if last.text.ends_with('=') && has_quoted_printable_encoding(&last.text) {
                last.text.pop();
                last.text.push_str(line.text.trim_start_matches([' ', '\t']));
                continue;
            }
            if line.text.starts_with([' ', '\t']) {
                last.text.push_str(&line.text[1..]);
                continue;
            }
        }
        if line.text.trim().is_empty() {
            continue;
        }
        unfolded.push(line);
    }
    unfolded
}

fn has_quoted_printable_encoding(line: &str) -> bool {
    let Some((prefix, _)) = line.split_once(':') else {
        return false;
    };
    prefix.split(';').skip(1).any(|part| {
        let trimmed = part.trim();
        match trimmed.split_once('=') {
            Some((name, value)) => {
                name.trim().eq_ignore_ascii_case("ENCODING")
                    && value.trim().eq_ignore_ascii_case("QUOTED-PRINTABLE")
            }
            None => trimmed.eq_ignore_ascii_case("QUOTED-PRINTABLE"),
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Encoding {
    #[default]
    Plain,
    QuotedPrintable,
    Base64,
}

#[derive(Debug, Default)]
struct Params {
    types: Vec<String>,
    pref: bool,
    encoding: Encoding,
    charset: Option<String>,
    uri: bool,
}

impl Params {
    /// Type tokens, with `pref` added when requested by any parameter form.
    fn typed(&self, value: String) -> TypedValue {
        let mut item = TypedValue::with_types(value, self.types.iter().map(String::as_str));
        if self.pref {
            item.add_type("pref");
        }
        item
    }
}

fn parse_parameters<'a>(raw_params: impl Iterator<Item = &'a str>) -> Params {
    let mut parsed = Params::default();
    for param in raw_params {
        let trimmed = param.trim();
        if trimmed.is_empty() {
            continue;
        }
        match trimmed.split_once('=') {
            Some((name, value)) => handle_named_parameter(name, value, &mut parsed),
            None => handle_positional_parameter(trimmed, &mut parsed),
        }
    }
    parsed
}

fn handle_named_parameter(name: &str, value: &str, parsed: &mut Params) {
    let value = clean_quotes(value);
    match name.trim().to_ascii_uppercase().as_str() {
        "TYPE" => {
            for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                if item.eq_ignore_ascii_case("PREF") {
                    parsed.pref = true;
                } else {
                    parsed.types.push(item.to_string());
                }
            }
        }
        "PREF" => parsed.pref = true,
        "ENCODING" => {
            parsed.encoding = match value.to_ascii_uppercase().as_str() {
                "QUOTED-PRINTABLE" => Encoding::QuotedPrintable,
                "B" | "BASE64" => Encoding::Base64,
                _ => Encoding::Plain,
            }
        }
        "CHARSET" => parsed.charset = Some(value),
        "VALUE" => {
            parsed.uri = value.eq_ignore_ascii_case("URI") || value.eq_ignore_ascii_case("URL")
        }
        _ => {}
    }
}

fn handle_positional_parameter(param: &str, parsed: &mut Params) {
    match param.to_ascii_uppercase().as_str() {
        "PREF" => parsed.pref = true,
        "QUOTED-PRINTABLE" => parsed.encoding = Encoding::QuotedPrintable,
        "BASE64" => parsed.encoding = Encoding::Base64,
        "7BIT" | "8BIT" => {}
        _ => parsed.types.push(param.to_string()),
    }
}

fn clean_quotes(value: &str) -> String {
    let trimmed = value.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(trimmed)
        .to_string()
}

fn split_group(property: &str) -> (Option<&str>, &str) {
    match property.split_once('.') {
        Some((group, name)) => (Some(group), name),
        None => (None, property),
    }
}

fn decode_quoted_printable(input: &str) -> Result<Vec<u8>, String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] != b'=' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        // A trailing `=` is a soft line break already joined by unfolding.
        if i + 1 >= bytes.len() {
            break;
        }
        if i + 2 >= bytes.len() {
            return Err("truncated quoted-printable escape".to_string());
        }
        let value = decode_hex_pair(bytes[i + 1], bytes[i + 2]).ok_or_else(|| {
            format!(
                "invalid quoted-printable escape: ={}{}",
                bytes[i + 1] as char,
                bytes[i + 2] as char
            )
        })?;
        out.push(value);
        i += 3;
    }
    Ok(out)
}

fn decode_hex_pair(a: u8, b: u8) -> Option<u8> {
    let high = (a as char).to_digit(16)?;
    let low = (b as char).to_digit(16)?;
    Some(((high << 4) | low) as u8)
}

fn is_utf8_charset(charset: &str) -> bool {
    charset.eq_ignore_ascii_case("UTF-8") || charset.eq_ignore_ascii_case("US-ASCII")
}

/// Undo transfer encoding and charset. Base64 payloads are returned as-is.
fn decode_value(raw: &str, params: &Params, line: usize, diag: &mut Diagnostics) -> String {
    if let Some(charset) = params.charset.as_deref().filter(|c| !is_utf8_charset(c)) {
        diag.record(Some(line), format!("Unsupported charset: {charset}"));
    }
    if params.encoding != Encoding::QuotedPrintable {
        return raw.to_string();
    }
    match decode_quoted_printable(raw) {
        Ok(bytes) => {
            let text = match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(err) => {
                    if params.charset.as_deref().map_or(true, is_utf8_charset) {
                        diag.record(Some(line), "Invalid UTF-8 in quoted-printable value");
                    }
                    String::from_utf8_lossy(err.as_bytes()).into_owned()
                }
            };
            text.replace("\r\n", "\n")
        }
        Err(message) => {
            diag.record(Some(line), message);
            raw.to_string()
        }
    }
}

fn unescape_text(value: &str, version: CardVersion) -> String {
    if version == CardVersion::V21 {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(next @ ('\\' | ',' | ';')) => out.push(next),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Split a `;`-separated value, unescaping each component.
fn split_structured(value: &str, version: CardVersion) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match (version, chars.peek().copied()) {
                (_, Some(next @ (';' | '\\'))) => {
                    current.push(next);
                    chars.next();
                }
                (CardVersion::V30, Some(',')) => {
                    current.push(',');
                    chars.next();
                }
                (CardVersion::V30, Some('n' | 'N')) => {
                    current.push('\n');
                    chars.next();
                }
                _ => current.push('\\'),
            },
            ';' => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn find_version(lines: &[RawLine]) -> Option<&str> {
    lines.iter().find_map(|l| {
        let (lhs, value) = l.text.split_once(':')?;
        let (_, name) = split_group(lhs.split(';').next()?.trim());
        name.eq_ignore_ascii_case("VERSION").then(|| value.trim())
    })
}

fn parse_card(card: CardLines, diag: &mut Diagnostics) -> ContactItem {
    let lines = unfold_lines(card.lines);
    let mut item = ContactItem {
        original_format: ORIGINAL_FORMAT.to_string(),
        ..Default::default()
    };

    let version = match find_version(&lines) {
        Some(raw) => {
            item.version = raw.to_string();
            CardVersion::parse(raw).unwrap_or_else(|| {
                diag.record(Some(card.begin), format!("Unsupported vCard version: {raw}"));
                CardVersion::V30
            })
        }
        None => {
            item.version = CardVersion::V21.as_str().to_string();
            CardVersion::V21
        }
    };

    let mut unknown = 0usize;
    for line in &lines {
        let Some((lhs, raw_value)) = line.text.split_once(':') else {
            diag.record(Some(line.line), format!("Invalid line: {}", line.text));
            continue;
        };
        let mut parts = lhs.split(';');
        let (_, name) = split_group(parts.next().unwrap_or_default().trim());
        let name = name.to_ascii_uppercase();
        let params = parse_parameters(parts);
        let passthrough = TagValue::new(lhs, raw_value);

        if !apply_property(&mut item, &name, &params, raw_value, version, line.line, diag) {
            if OTHER_TAGS.contains(&name.as_str()) || SINGULAR_TAGS.contains(&name.as_str()) {
                item.other_tags.push(passthrough);
            } else {
                item.unknown_tags.push(passthrough);
                unknown += 1;
            }
        }
    }

    if unknown > 0 {
        diag.record(Some(card.begin), format!("{unknown} unknown tags found"));
    }
    item.calculate_fields();
    item
}

/// Map one property onto the model. Returns false when the property must be
/// kept verbatim instead.
fn apply_property(
    item: &mut ContactItem,
    name: &str,
    params: &Params,
    raw_value: &str,
    version: CardVersion,
    line: usize,
    diag: &mut Diagnostics,
) -> bool {
    if name == "PHOTO" {
        return apply_photo(item, params, raw_value, line, diag);
    }
    if let Some((_, implied)) = MESSENGER_TAGS.iter().find(|(tag, _)| *tag == name) {
        let value = unescape_text(&decode_value(raw_value, params, line, diag), version);
        let mut im = params.typed(value);
        if let Some(implied) = implied {
            im.add_type(*implied);
        }
        item.ims.push(im);
        return true;
    }

    let value = decode_value(raw_value, params, line, diag);
    let text = || unescape_text(&value, version);
    match name {
        "VERSION" => true,
        "UID" => set_once(&mut item.id, text()),
        "FN" => set_once(&mut item.full_name, text()),
        "NICKNAME" => set_once(&mut item.nick_name, text()),
        "TITLE" => set_once(&mut item.title, text()),
        "NOTE" => set_once(&mut item.description, text()),
        "SORT-STRING" => set_once(&mut item.sort_string, text()),
        "URL" => set_once(&mut item.url, text()),
        "ORG" => set_once(&mut item.organization, split_structured(&value, version).join(";")),
        "N" => {
            if !item.names.is_empty() {
                return false;
            }
            item.names = split_structured(&value, version);
            item.drop_final_empty_names();
            true
        }
        "TEL" => {
            item.phones.push(params.typed(text()));
            true
        }
        "EMAIL" => {
            item.emails.push(params.typed(text()));
            true
        }
        "ADR" => {
            let typed = params.typed(String::new());
            let parts = split_structured(&value, version);
            item.addrs.push(PostalAddress::from_components(typed.types, &parts));
            true
        }
        "BDAY" => {
            if item.birthday.is_some() {
                return false;
            }
            if let Some(date) = parse_date(&value, line, diag) {
                item.birthday = Some(date);
            }
            true
        }
        "ANNIVERSARY" | "X-ANNIVERSARY" => {
            if let Some(date) = parse_date(&value, line, diag) {
                item.anniversaries.push(date);
            }
            true
        }
        _ => false,
    }
}

// Singular fields keep the first occurrence; repeats go to passthrough.
fn set_once(field: &mut String, value: String) -> bool {
    if !field.is_empty() {
        return false;
    }
    *field = value;
    true
}

fn parse_date(value: &str, line: usize, diag: &mut Diagnostics) -> Option<DateItem> {
    let date = DateItem::parse(value);
    if date.is_none() {
        diag.record(Some(line), format!("Invalid datetime: {}", value.trim()));
    }
    date
}

fn apply_photo(
    item: &mut ContactItem,
    params: &Params,
    raw_value: &str,
    line: usize,
    diag: &mut Diagnostics,
) -> bool {
    if !item.photo.is_empty() {
        return false;
    }
    let declared = params
        .types
        .first()
        .map(|t| {
            let upper = t.to_ascii_uppercase();
            upper
                .strip_prefix("IMAGE/")
                .map(str::to_string)
                .unwrap_or(upper)
        })
        .unwrap_or_default();

    if params.uri || params.encoding != Encoding::Base64 {
        item.photo.url = raw_value.trim().to_string();
        item.photo.p_type = declared;
        return true;
    }

    let payload: String = raw_value.chars().filter(|c| !c.is_whitespace()).collect();
    match STANDARD.decode(payload.as_bytes()) {
        Ok(data) => {
            item.photo.data = data;
            item.photo.p_type = if declared.is_empty() {
                item.photo.detect_format().to_string()
            } else {
                declared
            };
        }
        Err(err) => diag.record(Some(line), format!("Invalid photo data: {err}")),
    }
    true
}

/// Serialize records, one card each, with CRLF line endings.
pub fn write_cards<'a>(
    items: impl IntoIterator<Item = &'a ContactItem>,
    options: &CardOptions,
) -> String {
    items
        .into_iter()
        .map(|item| write_card(item, options.version_for(item), options))
        .collect()
}

pub fn write_card(item: &ContactItem, version: CardVersion, options: &CardOptions) -> String {
    let mut w = CardWriter {
        version,
        out: String::new(),
    };
    w.raw_line(BEGIN_VCARD);
    w.raw_line(&format!("VERSION:{}", version.as_str()));
    if !item.id.is_empty() {
        w.text("UID", &[], &item.id);
    }
    if !item.names.is_empty() {
        w.structured("N", &[], item.names.iter().map(String::as_str));
    }
    if !item.full_name.is_empty() {
        w.text("FN", &[], &item.full_name);
    }
    if !item.nick_name.is_empty() {
        w.text("NICKNAME", &[], &item.nick_name);
    }
    for phone in &item.phones {
        w.text("TEL", &phone.types, &phone.value);
    }
    for email in &item.emails {
        w.text("EMAIL", &email.types, &email.value);
    }
    for addr in &item.addrs {
        w.structured("ADR", &addr.types, addr.components().into_iter());
    }
    let date_format = match version {
        CardVersion::V21 => DateFormat::IsoBasic,
        CardVersion::V30 => DateFormat::IsoExtended,
    };
    if let Some(birthday) = &item.birthday {
        let value = birthday.to_iso(date_format, options.skip_time_from_date);
        w.raw_line(&format!("BDAY:{value}"));
    }
    for date in &item.anniversaries {
        let value = date.to_iso(date_format, options.skip_time_from_date);
        w.raw_line(&format!("X-ANNIVERSARY:{value}"));
    }
    if !item.organization.is_empty() {
        w.structured("ORG", &[], item.organization.split(';'));
    }
    if !item.title.is_empty() {
        w.text("TITLE", &[], &item.title);
    }
    if !item.description.is_empty() {
        w.text("NOTE", &[], &item.description);
    }
    if !item.sort_string.is_empty() {
        w.text("SORT-STRING", &[], &item.sort_string);
    }
    if !item.url.is_empty() {
        w.text("URL", &[], &item.url);
    }
    w.photo(item);
    for im in &item.ims {
        let (tag, implied) = MESSENGER_EXPORT
            .iter()
            .find(|(t, _)| im.has_type(t))
            .map(|(t, tag)| (*tag, Some(*t)))
            .unwrap_or(("IMPP", None));
        let types: Vec<String> = im
            .types
            .iter()
            .filter(|t| implied.map_or(true, |i| !t.eq_ignore_ascii_case(i)))
            .cloned()
            .collect();
        w.text(tag, &types, &im.value);
    }
    for tag in item.other_tags.iter().chain(&item.unknown_tags) {
        w.passthrough(tag);
    }
    w.raw_line(END_VCARD);
    w.out
}

struct CardWriter {
    version: CardVersion,
    out: String,
}

impl CardWriter {
    fn raw_line(&mut self, line: &str) {
        match self.version {
            CardVersion::V21 => self.out.push_str(line),
            CardVersion::V30 => self.out.push_str(&fold_line(line)),
        }
        self.out.push_str("\r\n");
    }

    fn type_params(&self, types: &[String]) -> String {
        if types.is_empty() {
            return String::new();
        }
        let upper: Vec<String> = types.iter().map(|t| t.to_ascii_uppercase()).collect();
        match self.version {
            CardVersion::V21 => upper.iter().map(|t| format!(";{t}")).collect(),
            CardVersion::V30 => format!(";TYPE={}", upper.join(",")),
        }
    }

    fn emit(&mut self, name: &str, types: &[String], value: &str) {
        let params = self.type_params(types);
        let needs_qp = self.version == CardVersion::V21
            && (!value.is_ascii() || value.contains('\n') || value.contains('\r'));
        if needs_qp {
            let prefix = format!("{name}{params};CHARSET=UTF-8;ENCODING=QUOTED-PRINTABLE:");
            self.out.push_str(&encode_quoted_printable(&prefix, value));
            self.out.push_str("\r\n");
        } else {
            self.raw_line(&format!("{name}{params}:{value}"));
        }
    }

    fn text(&mut self, name: &str, types: &[String], value: &str) {
        let escaped = escape_text(value, self.version);
        self.emit(name, types, &escaped);
    }

    fn structured<'a>(
        &mut self,
        name: &str,
        types: &[String],
        parts: impl Iterator<Item = &'a str>,
    ) {
        let joined = parts
            .map(|p| escape_component(p, self.version))
            .collect::<Vec<_>>()
            .join(";");
        self.emit(name, types, &joined);
    }

    fn photo(&mut self, item: &ContactItem) {
        let photo = &item.photo;
        if photo.is_empty() {
            return;
        }
        let type_param = match photo.p_type.as_str() {
            "" | "UNKNOWN" => String::new(),
            t => format!(";TYPE={t}"),
        };
        if photo.data.is_empty() {
            let uri = match self.version {
                CardVersion::V21 => "URL",
                CardVersion::V30 => "uri",
            };
            self.raw_line(&format!("PHOTO;VALUE={uri}{type_param}:{}", photo.url));
            return;
        }
        let encoding = match self.version {
            CardVersion::V21 => "BASE64",
            CardVersion::V30 => "b",
        };
        let line = format!(
            "PHOTO;ENCODING={encoding}{type_param}:{}",
            STANDARD.encode(&photo.data)
        );
        self.out.push_str(&fold_line(&line));
        self.out.push_str("\r\n");
        if self.version == CardVersion::V21 {
            self.out.push_str("\r\n");
        }
    }

    fn passthrough(&mut self, tag: &TagValue) {
        self.raw_line(&format!("{}:{}", tag.tag, tag.value));
    }
}

fn escape_text(value: &str, version: CardVersion) -> String {
    match version {
        CardVersion::V21 => value.to_string(),
        CardVersion::V30 => {
            let mut out = String::with_capacity(value.len());
            for c in value.chars() {
                match c {
                    '\\' => out.push_str("\\\\"),
                    ',' => out.push_str("\\,"),
                    ';' => out.push_str("\\;"),
                    '\n' => out.push_str("\\n"),
                    '\r' => {}
                    _ => out.push(c),
                }
            }
            out
        }
    }
}

fn escape_component(value: &str, version: CardVersion) -> String {
    match version {
        // A bare trailing backslash would swallow the separator after it.
        CardVersion::V21 => value.replace('\\', "\\\\").replace(';', "\\;"),
        CardVersion::V30 => escape_text(value, version),
    }
}

/// Quoted-printable body with `=` soft breaks keeping lines within 76
/// columns. Spaces are encoded so continuation lines never start blank.
fn encode_quoted_printable(prefix: &str, value: &str) -> String {
    let mut out = String::from(prefix);
    let mut col = prefix.len();
    for b in value.replace("\r\n", "\n").replace('\n', "\r\n").bytes() {
        let token = if (33..=126).contains(&b) && b != b'=' {
            (b as char).to_string()
        } else {
            format!("={b:02X}")
        };
        if col + token.len() > FOLD_LIMIT {
            out.push_str("=\r\n");
            col = 0;
        }
        out.push_str(&token);
        col += token.len();
    }
    out
}

/// Fold a logical line into chunks of at most 75 octets, continuation lines
/// starting with one space. Never splits inside a character or right after
/// an `=`.
fn fold_line(line: &str) -> String {
    if line.len() <= FOLD_LIMIT {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len() + line.len() / FOLD_LIMIT * 3);
    let mut rest = line;
    let mut limit = FOLD_LIMIT;
    while rest.len() > limit {
        let mut cut = limit;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut > 1 && rest.as_bytes()[cut - 1] == b'=' {
            cut -= 1;
        }
        out.push_str(&rest[..cut]);
        out.push_str("\r\n ");
        rest = &rest[cut..];
        limit = FOLD_LIMIT - 1;
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::Photo;

    fn parse(text: &str) -> (Vec<ContactItem>, Diagnostics) {
        let mut diag = Diagnostics::default();
        let items = parse_cards(text, &mut diag);
        (items, diag)
    }

    fn messages(diag: &Diagnostics) -> Vec<String> {
        diag.errors().iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn parses_legacy_quoted_printable_card() {
        let text = "BEGIN:VCARD\r\n\
VERSION:2.1\r\n\
N;CHARSET=UTF-8;ENCODING=QUOTED-PRINTABLE:=D0=98=D0=B2=D0=B0=D0=BD=D0=BE=D0=B2;=D0=9F=\r\n\
=D0=B5=D1=82=D1=80\r\n\
TEL;CELL;PREF:+79161234567\r\n\
TEL;HOME:84951234567\r\n\
EMAIL;INTERNET:ivan@example.com\r\n\
NOTE;ENCODING=QUOTED-PRINTABLE:line one=0D=0Aline two\r\n\
BDAY:19800229\r\n\
END:VCARD\r\n";
        let (items, diag) = parse(text);
        assert!(diag.errors().is_empty(), "{:?}", messages(&diag));
        let item = &items[0];
        assert_eq!(item.names, ["Иванов", "Петр"]);
        assert_eq!(item.phones.len(), 2);
        assert!(item.phones[0].has_type("cell") && item.phones[0].has_type("pref"));
        assert_eq!(item.phones[0].types, ["cell", "pref"]);
        assert_eq!(item.pref_phone, "+79161234567");
        assert_eq!(item.emails[0].types, ["internet"]);
        assert_eq!(item.description, "line one\nline two");
        assert_eq!(item.birthday, DateItem::from_date(1980, 2, 29));
        assert_eq!(item.original_format, "vCard");
        assert_eq!(item.version, "2.1");
    }

    #[test]
    fn parses_current_escapes_and_folding() {
        let text = "begin:vcard\n\
version:3.0\n\
N:Doe;John\\, Jr.;;;\n\
FN:John Doe\n\
NOTE:first\\nsecond\\; third \\\\ end\n\
TEL;TYPE=WORK,VOICE;TYPE=pref:555\n\
ADR;TYPE=home:;;Main St 1;Spring\n field;;12345;USA\n\
item1.X-ABLabel:custom\n\
CATEGORIES:friends\n\
end:vcard\n";
        let (items, diag) = parse(text);
        let item = &items[0];
        assert_eq!(item.names, ["Doe", "John, Jr."]);
        assert_eq!(item.full_name, "John Doe");
        assert_eq!(item.description, "first\nsecond; third \\ end");
        assert_eq!(item.phones[0].types, ["work", "voice", "pref"]);
        assert_eq!(item.addrs[0].street, "Main St 1");
        assert_eq!(item.addrs[0].city, "Springfield");
        assert_eq!(item.addrs[0].postal_code, "12345");
        assert!(item.addrs[0].has_type("HOME"));
        assert_eq!(item.other_tags, [TagValue::new("CATEGORIES", "friends")]);
        assert_eq!(item.unknown_tags, [TagValue::new("item1.X-ABLabel", "custom")]);
        assert_eq!(messages(&diag), ["line 1: 1 unknown tags found"]);
    }

    #[test]
    fn reports_unclosed_and_unterminated_records() {
        let text = "BEGIN:VCARD\nFN:One\nBEGIN:VCARD\nFN:Two\nEND:VCARD\nBEGIN:VCARD\nFN:Three\n";
        let (items, diag) = parse(text);
        let names: Vec<&str> = items.iter().map(|i| i.full_name.as_str()).collect();
        assert_eq!(names, ["One", "Two", "Three"]);
        assert_eq!(
            messages(&diag),
            ["line 3: Unclosed record before line 3", "Last section not closed"]
        );
    }

    #[test]
    fn repeated_singular_properties_are_kept_aside() {
        let (items, diag) = parse(
            "BEGIN:VCARD\nVERSION:3.0\nFN:First Name\nFN:Second Name\nBDAY:1990-01-01\n\
BDAY:1991-02-02\nEND:VCARD\n",
        );
        assert!(diag.errors().is_empty());
        let item = &items[0];
        assert_eq!(item.full_name, "First Name");
        assert_eq!(item.birthday, DateItem::from_date(1990, 1, 1));
        assert_eq!(
            item.other_tags,
            [TagValue::new("FN", "Second Name"), TagValue::new("BDAY", "1991-02-02")]
        );
        assert!(item.unknown_tags.is_empty());
    }

    #[test]
    fn invalid_date_is_a_record_error() {
        let text = "BEGIN:VCARD\nVERSION:3.0\nFN:X\nBDAY:1999-13-01\nEND:VCARD\n";
        let (items, diag) = parse(text);
        assert_eq!(items.len(), 1);
        assert!(items[0].birthday.is_none());
        assert_eq!(messages(&diag), ["line 4: Invalid datetime: 1999-13-01"]);
    }

    #[test]
    fn messengers_map_to_implied_types() {
        let text = "BEGIN:VCARD\nVERSION:3.0\nX-JABBER:me@jabber.org\nX-ICQ;TYPE=HOME:12345\n\
X-SKYPE:skyper\nIMPP:sip:me@example.com\nEND:VCARD\n";
        let (items, _) = parse(text);
        let item = &items[0];
        assert_eq!(item.find_im_by_type("xmpp"), Some("me@jabber.org"));
        assert_eq!(item.find_im_by_type("icq"), Some("12345"));
        assert!(item.ims[1].has_type("home"));
        assert_eq!(item.find_im_by_type("skype"), Some("skyper"));
        assert!(item.ims[3].types.is_empty());

        let out = write_card(item, CardVersion::V30, &CardOptions::default());
        assert!(out.contains("X-JABBER:me@jabber.org\r\n"));
        assert!(out.contains("X-ICQ;TYPE=HOME:12345\r\n"));
        assert!(out.contains("X-SKYPE-USERNAME:skyper\r\n"));
        assert!(out.contains("IMPP:sip:me@example.com\r\n"));
    }

    #[test]
    fn photo_type_detected_when_missing() {
        let jpeg = b"\xFF\xD8\xFF\xE0\x00\x10JFIF\x00\x01".to_vec();
        let text = format!(
            "BEGIN:VCARD\nVERSION:2.1\nPHOTO;ENCODING=BASE64:{}\n\nEND:VCARD\n",
            STANDARD.encode(&jpeg)
        );
        let (items, diag) = parse(&text);
        assert!(diag.errors().is_empty());
        assert_eq!(
            items[0].photo,
            Photo {
                p_type: "JPEG".into(),
                url: String::new(),
                data: jpeg
            }
        );

        let (by_ref, _) = parse("BEGIN:VCARD\nVERSION:3.0\nPHOTO;VALUE=uri:http://x/y.png\nEND:VCARD\n");
        assert_eq!(by_ref[0].photo.url, "http://x/y.png");
        assert!(by_ref[0].photo.data.is_empty());
    }

    #[test]
    fn unsupported_charset_is_reported() {
        let text = "BEGIN:VCARD\nVERSION:2.1\nN;CHARSET=WINDOWS-1251:Smith\nEND:VCARD\n";
        let (items, diag) = parse(text);
        assert_eq!(items[0].names, ["Smith"]);
        assert_eq!(messages(&diag), ["line 3: Unsupported charset: WINDOWS-1251"]);
    }

    fn rich_item() -> ContactItem {
        let mut item = ContactItem {
            id: "a1b2c3d4e5".into(),
            full_name: "Пётр Иванов".into(),
            names: vec!["Иванов".into(), "Пётр".into(), "".into(), "Dr.".into()],
            phones: vec![
                TypedValue::with_types("+79161234567", ["cell", "pref"]),
                TypedValue::with_types("84951234567", ["home"]),
            ],
            emails: vec![TypedValue::with_types("petr@example.com", ["internet"])],
            ims: vec![TypedValue::with_types("petr@jabber.ru", ["xmpp"])],
            addrs: vec![PostalAddress {
                types: vec!["work".into()],
                street: "Lenina; 1".into(),
                city: "Москва".into(),
                country: "Russia".into(),
                ..Default::default()
            }],
            birthday: DateItem::from_date(1975, 6, 1),
            anniversaries: vec![DateItem::from_date(2001, 9, 9)
                .and_then(|d| d.with_time(12, 30, 0))
                .unwrap()],
            organization: "ACME;R&D".into(),
            title: "Engineer, senior".into(),
            description: "Multi\nline note with a long tail that certainly exceeds the folding limit of the line"
                .into(),
            nick_name: "petya".into(),
            url: "http://example.com/petr".into(),
            photo: Photo {
                p_type: "PNG".into(),
                url: String::new(),
                data: b"\x89PNG\r\n\x1a\n0123456789abcdef0123456789abcdef0123456789abcdef0123456789".to_vec(),
            },
            other_tags: vec![TagValue::new("REV", "20240101T000000Z")],
            unknown_tags: vec![TagValue::new("X-CUSTOM;TYPE=foo", "bar")],
            original_format: ORIGINAL_FORMAT.into(),
            ..Default::default()
        };
        item.calculate_fields();
        item
    }

    fn round_trip(version: CardVersion) {
        let mut item = rich_item();
        item.version = version.as_str().into();
        let options = CardOptions::default();
        let text = write_card(&item, version, &options);
        let (parsed, diag) = parse(&text);
        assert_eq!(messages(&diag), ["line 1: 1 unknown tags found"]);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0], item);

        let again = write_card(&parsed[0], version, &options);
        assert_eq!(again, text);
    }

    #[test]
    fn legacy_round_trip() {
        round_trip(CardVersion::V21);
    }

    #[test]
    fn current_round_trip() {
        round_trip(CardVersion::V30);
    }

    #[test]
    fn legacy_components_keep_backslashes_apart_from_separators() {
        let mut item = ContactItem {
            names: vec!["Ivanov\\".into(), "Petr\\;Jr".into(), "a\\b".into()],
            version: "2.1".into(),
            original_format: ORIGINAL_FORMAT.into(),
            ..Default::default()
        };
        item.calculate_fields();
        let text = write_card(&item, CardVersion::V21, &CardOptions::default());
        assert!(text.contains("N:Ivanov\\\\;Petr\\\\\\;Jr;a\\\\b\r\n"));

        let (parsed, diag) = parse(&text);
        assert!(diag.errors().is_empty());
        assert_eq!(parsed[0].names, item.names);
    }

    #[test]
    fn legacy_export_uses_quoted_printable_within_76_columns() {
        let item = rich_item();
        let text = write_card(&item, CardVersion::V21, &CardOptions::default());
        assert!(text.contains("FN;CHARSET=UTF-8;ENCODING=QUOTED-PRINTABLE:"));
        assert!(text.contains("TEL;CELL;PREF:+79161234567\r\n"));
        assert!(text.contains("BDAY:19750601\r\n"));
        assert!(text.contains("X-ANNIVERSARY:20010909T123000\r\n"));
        for line in text.split("\r\n").filter(|l| l.contains("=D0") || l.contains("=0A")) {
            assert!(line.len() <= 76, "{line}");
        }
    }

    #[test]
    fn current_export_folds_at_75_octets() {
        let item = rich_item();
        let text = write_card(&item, CardVersion::V30, &CardOptions::default());
        assert!(text.contains("TEL;TYPE=CELL,PREF:+79161234567\r\n"));
        assert!(text.contains("BDAY:1975-06-01\r\n"));
        assert!(text.contains("NOTE:Multi\\nline"));
        assert!(text.contains("ORG:ACME;R&D\r\n"));
        assert!(text.contains("TITLE:Engineer\\, senior\r\n"));
        assert!(text.split("\r\n").all(|l| l.len() <= 75));
    }

    #[test]
    fn skip_time_drops_time_of_day() {
        let item = rich_item();
        let options = CardOptions {
            skip_time_from_date: true,
            ..Default::default()
        };
        let text = write_card(&item, CardVersion::V30, &options);
        assert!(text.contains("X-ANNIVERSARY:2001-09-09\r\n"));
    }

    #[test]
    fn version_policy_selects_output_version() {
        let mut item = ContactItem::default();
        let detected = CardOptions {
            preferred_version: CardVersion::V30,
            ..Default::default()
        };
        assert_eq!(detected.version_for(&item), CardVersion::V30);
        item.version = "2.1".into();
        assert_eq!(detected.version_for(&item), CardVersion::V21);
        let current = detected.with_policy(VersionPolicy::Current);
        assert_eq!(current.version_for(&item), CardVersion::V30);
        let legacy = detected.with_policy(VersionPolicy::Legacy);
        assert_eq!(legacy.version_for(&item), CardVersion::V21);
    }

    #[test]
    fn fold_line_never_splits_characters() {
        let line = format!("NOTE:{}", "ж".repeat(60));
        let folded = fold_line(&line);
        for (i, part) in folded.split("\r\n").enumerate() {
            assert!(part.len() <= 75);
            if i > 0 {
                assert!(part.starts_with(' '));
            }
        }
        let rejoined: String = folded
            .split("\r\n")
            .enumerate()
            .map(|(i, p)| if i == 0 { p } else { &p[1..] })
            .collect();
        assert_eq!(rejoined, line);
    }
}
