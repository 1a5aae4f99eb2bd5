//! Canonical in-memory contact model, independent of any file format.

use std::ops::{Deref, DerefMut};

use time::{Date, Month, PrimitiveDateTime, Time};

use crate::compare::PairState;
use crate::typed::{self, same_type_set, Email, Messenger, Phone};

/// Display name used when a record has no usable field at all.
pub const EMPTY_CONTACT_NAME: &str = "Strange empty contact";

/// A tag and its raw value, kept verbatim for round-tripping.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagValue {
    pub tag: String,
    pub value: String,
}

impl TagValue {
    pub fn new(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Eq)]
pub struct PostalAddress {
    pub types: Vec<String>,
    pub off_box: String,
    pub extended: String,
    pub street: String,
    pub city: String,
    pub region: String,
    pub postal_code: String,
    pub country: String,
}

impl PostalAddress {
    /// Build from the seven structured components (missing ones stay empty).
    pub fn from_components(types: Vec<String>, parts: &[String]) -> Self {
        let part = |i: usize| parts.get(i).cloned().unwrap_or_default();
        Self {
            types,
            off_box: part(0),
            extended: part(1),
            street: part(2),
            city: part(3),
            region: part(4),
            postal_code: part(5),
            country: part(6),
        }
    }

    pub fn components(&self) -> [&str; 7] {
        [
            &self.off_box,
            &self.extended,
            &self.street,
            &self.city,
            &self.region,
            &self.postal_code,
            &self.country,
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.components().iter().all(|c| c.is_empty())
    }

    /// Field-by-field equality ignoring the type tags.
    pub fn same_location(&self, other: &Self) -> bool {
        self.components() == other.components()
    }

    pub fn has_type(&self, item_type: &str) -> bool {
        self.types.iter().any(|t| t.eq_ignore_ascii_case(item_type))
    }
}

impl PartialEq for PostalAddress {
    fn eq(&self, other: &Self) -> bool {
        same_type_set(&self.types, &other.types) && self.same_location(other)
    }
}

/// Which ISO 8601 flavour to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    /// `yyyyMMddThhmmss`
    IsoBasic,
    /// `yyyy-MM-ddThh:mm:ss`
    IsoExtended,
}

/// A date with optional time and optional UTC offset.
#[derive(Debug, Clone, Copy)]
pub struct DateItem {
    pub value: PrimitiveDateTime,
    pub has_time: bool,
    pub has_time_zone: bool,
    pub zone_hour: i8,
    pub zone_min: i8,
}

impl DateItem {
    pub fn from_date(year: i32, month: u8, day: u8) -> Option<Self> {
        let month = Month::try_from(month).ok()?;
        let date = Date::from_calendar_date(year, month, day).ok()?;
        Some(Self {
            value: PrimitiveDateTime::new(date, Time::MIDNIGHT),
            has_time: false,
            has_time_zone: false,
            zone_hour: 0,
            zone_min: 0,
        })
    }

    pub fn with_time(mut self, hour: u8, minute: u8, second: u8) -> Option<Self> {
        let time = Time::from_hms(hour, minute, second).ok()?;
        self.value = PrimitiveDateTime::new(self.value.date(), time);
        self.has_time = true;
        Some(self)
    }

    pub fn with_zone(mut self, hour: i8, minute: i8) -> Self {
        self.has_time_zone = true;
        self.zone_hour = hour;
        self.zone_min = minute;
        self
    }

    /// Parse `yyyy-mm-dd` or `yyyymmdd`, optionally followed by
    /// `Thh:mm:ss`/`Thhmmss` and `Z` or `±hh[:mm]`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let (date_part, time_part) = match input.split_once(['T', 't']) {
            Some((d, t)) => (d, Some(t)),
            None => (input, None),
        };

        let digits: String = date_part.chars().filter(|c| *c != '-').collect();
        if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let year: i32 = digits[0..4].parse().ok()?;
        let month: u8 = digits[4..6].parse().ok()?;
        let day: u8 = digits[6..8].parse().ok()?;
        let mut item = Self::from_date(year, month, day)?;

        let Some(time_part) = time_part else {
            return Some(item);
        };

        let zone_start = time_part.find(['Z', 'z', '+', '-']);
        let (clock, zone) = match zone_start {
            Some(pos) => (&time_part[..pos], Some(&time_part[pos..])),
            None => (time_part, None),
        };
        let clock: String = clock.chars().filter(|c| *c != ':').collect();
        if !clock.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let (hour, minute, second) = match clock.len() {
            4 => (clock[0..2].parse().ok()?, clock[2..4].parse().ok()?, 0),
            6 => (
                clock[0..2].parse().ok()?,
                clock[2..4].parse().ok()?,
                clock[4..6].parse().ok()?,
            ),
            _ => return None,
        };
        item = item.with_time(hour, minute, second)?;

        match zone {
            None => Some(item),
            Some(z) if z.eq_ignore_ascii_case("z") => Some(item.with_zone(0, 0)),
            Some(z) => {
                let negative = z.starts_with('-');
                let body: String = z[1..].chars().filter(|c| *c != ':').collect();
                if !body.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                let (h, m): (i8, i8) = match body.len() {
                    1 | 2 => (body.parse().ok()?, 0),
                    4 => (body[0..2].parse().ok()?, body[2..4].parse().ok()?),
                    _ => return None,
                };
                if h > 14 || m > 59 {
                    return None;
                }
                let sign = if negative { -1 } else { 1 };
                Some(item.with_zone(sign * h, sign * m))
            }
        }
    }

    pub fn to_iso(&self, format: DateFormat, skip_time: bool) -> String {
        let date = self.value.date();
        let mut out = match format {
            DateFormat::IsoBasic => format!(
                "{:04}{:02}{:02}",
                date.year(),
                u8::from(date.month()),
                date.day()
            ),
            DateFormat::IsoExtended => format!(
                "{:04}-{:02}-{:02}",
                date.year(),
                u8::from(date.month()),
                date.day()
            ),
        };
        if self.has_time && !skip_time {
            let t = self.value.time();
            match format {
                DateFormat::IsoBasic => {
                    out.push_str(&format!("T{:02}{:02}{:02}", t.hour(), t.minute(), t.second()))
                }
                DateFormat::IsoExtended => out.push_str(&format!(
                    "T{:02}:{:02}:{:02}",
                    t.hour(),
                    t.minute(),
                    t.second()
                )),
            }
            if self.has_time_zone {
                let sign = if self.zone_hour < 0 || self.zone_min < 0 {
                    '-'
                } else {
                    '+'
                };
                out.push_str(&format!(
                    "{}{:02}:{:02}",
                    sign,
                    self.zone_hour.unsigned_abs(),
                    self.zone_min.unsigned_abs()
                ));
            }
        }
        out
    }
}

// The offset only has to match when the left side carries one.
impl PartialEq for DateItem {
    fn eq(&self, other: &Self) -> bool {
        if self.has_time_zone
            && (self.zone_hour != other.zone_hour || self.zone_min != other.zone_min)
        {
            return false;
        }
        self.value == other.value
            && self.has_time == other.has_time
            && self.has_time_zone == other.has_time_zone
    }
}

/// Contact picture, inline or by reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Photo {
    pub p_type: String,
    pub url: String,
    pub data: Vec<u8>,
}

impl Photo {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.url.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Image format from magic bytes: `JPEG`, `PNG` or `UNKNOWN`.
    pub fn detect_format(&self) -> &'static str {
        if self.data.get(6..10) == Some(b"JFIF".as_slice()) {
            "JPEG"
        } else if self.data.get(1..4) == Some(b"PNG".as_slice()) {
            "PNG"
        } else {
            "UNKNOWN"
        }
    }
}

/// One section of a backup container this model does not understand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSection {
    pub id: [u8; 4],
    pub payload: Vec<u8>,
}

/// Device data that travels with a phone backup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupExtra {
    pub model: String,
    pub time_stamp: String,
    pub organizer: Vec<String>,
    pub notes: Vec<String>,
    pub sms: Vec<String>,
    pub sms_archive: Vec<String>,
    pub calls: Vec<String>,
    /// Section ids in the order they were read.
    pub section_order: Vec<[u8; 4]>,
    pub unknown_sections: Vec<RawSection>,
}

impl BackupExtra {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// One address-book entry.
///
/// `names` is position-significant: last, first, middle, honorific prefix,
/// honorific suffix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactItem {
    pub id: String,
    pub full_name: String,
    pub names: Vec<String>,
    pub phones: Vec<Phone>,
    pub emails: Vec<Email>,
    pub ims: Vec<Messenger>,
    pub addrs: Vec<PostalAddress>,
    pub birthday: Option<DateItem>,
    pub anniversaries: Vec<DateItem>,
    pub photo: Photo,
    pub organization: String,
    pub title: String,
    pub description: String,
    pub sort_string: String,
    pub nick_name: String,
    pub url: String,
    pub other_tags: Vec<TagValue>,
    pub unknown_tags: Vec<TagValue>,
    pub original_format: String,
    pub version: String,
    pub sub_version: String,

    // Derived by `calculate_fields`, never persisted.
    pub visible_name: String,
    pub pref_phone: String,
    pub pref_email: String,
    pub pref_im: String,

    // Set by the matching engine only.
    pub pair_state: PairState,
    pub pair_index: Option<usize>,
}

impl ContactItem {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Refresh the cached display name and preferred values.
    pub fn calculate_fields(&mut self) {
        self.visible_name = self.make_generic_name();
        self.pref_phone = typed::preferred_value(&self.phones)
            .unwrap_or_default()
            .to_string();
        self.pref_email = typed::preferred_value(&self.emails)
            .unwrap_or_default()
            .to_string();
        self.pref_im = typed::preferred_value(&self.ims)
            .unwrap_or_default()
            .to_string();
    }

    /// Best-effort display name, depending on which fields are filled.
    pub fn make_generic_name(&self) -> String {
        if !self.full_name.is_empty() {
            self.full_name.clone()
        } else if !self.names.is_empty() {
            self.format_names()
        } else if !self.organization.is_empty() {
            self.organization.clone()
        } else if !self.description.is_empty() {
            self.description.clone()
        } else if let Some(email) = self.emails.first() {
            email.value.clone()
        } else if let Some(phone) = self.phones.first() {
            phone.value.clone()
        } else if !self.sort_string.is_empty() {
            self.sort_string.clone()
        } else if !self.nick_name.is_empty() {
            self.nick_name.clone()
        } else {
            EMPTY_CONTACT_NAME.to_string()
        }
    }

    /// Join name components as `prefix last first  middle, suffix`.
    ///
    /// The middle name keeps the double space of the legacy layout.
    pub fn format_names(&self) -> String {
        let Some(last) = self.names.first() else {
            return String::new();
        };
        let mut res = last.clone();
        if let Some(first) = self.names.get(1) {
            if !res.is_empty() {
                res.push(' ');
            }
            res.push_str(first);
        }
        if let Some(middle) = self.names.get(2) {
            if !res.is_empty() {
                res.push(' ');
            }
            res.push(' ');
            res.push_str(middle);
        }
        if let Some(prefix) = self.names.get(3) {
            res = format!("{prefix} {res}");
        }
        if let Some(suffix) = self.names.get(4) {
            res.push_str(", ");
            res.push_str(suffix);
        }
        res
    }

    pub fn find_im_by_type(&self, item_type: &str) -> Option<&str> {
        typed::find_by_type(&self.ims, item_type).map(|im| im.value.as_str())
    }

    /// Remove empty components from the end of `names`.
    pub fn drop_final_empty_names(&mut self) {
        while self.names.last().is_some_and(|n| n.is_empty()) {
            self.names.pop();
        }
    }

    pub fn reset_pairing(&mut self) {
        self.pair_state = PairState::NotFound;
        self.pair_index = None;
    }
}

/// Ordered records plus whole-file metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactList {
    pub items: Vec<ContactItem>,
    pub extra: BackupExtra,
    pub original_profile: Vec<u8>,
}

impl ContactList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.extra.clear();
        self.original_profile.clear();
    }

    /// Position of the first record with this id.
    pub fn find_by_id(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    pub fn calculate_fields(&mut self) {
        for item in &mut self.items {
            item.calculate_fields();
        }
    }
}

impl From<Vec<ContactItem>> for ContactList {
    fn from(items: Vec<ContactItem>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }
}

impl Deref for ContactList {
    type Target = Vec<ContactItem>;

    fn deref(&self) -> &Self::Target {
        &self.items
    }
}

impl DerefMut for ContactList {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.items
    }
}
