//! Multi-valued fields carrying a set of type tags (`home`, `work`, `pref`...).

/// A value plus its type tags. Tags are compared case-insensitively and
/// without regard to order.
#[derive(Debug, Clone, Default, Eq)]
pub struct TypedValue {
    pub value: String,
    pub types: Vec<String>,
}

pub type Phone = TypedValue;
pub type Email = TypedValue;
pub type Messenger = TypedValue;

impl TypedValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            types: Vec::new(),
        }
    }

    pub fn with_types<I, S>(value: impl Into<String>, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut item = Self::new(value);
        for t in types {
            item.add_type(t);
        }
        item
    }

    pub fn has_type(&self, item_type: &str) -> bool {
        self.types.iter().any(|t| t.eq_ignore_ascii_case(item_type))
    }

    /// Add a tag unless an equal one (ignoring case) is already present.
    /// Empty tags are dropped.
    pub fn add_type(&mut self, item_type: impl Into<String>) {
        let item_type = item_type.into();
        let trimmed = item_type.trim();
        if trimmed.is_empty() || self.has_type(trimmed) {
            return;
        }
        self.types.push(trimmed.to_ascii_lowercase());
    }

    pub fn remove_type(&mut self, item_type: &str) {
        self.types.retain(|t| !t.eq_ignore_ascii_case(item_type));
    }
}

impl PartialEq for TypedValue {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && same_type_set(&self.types, &other.types)
    }
}

/// Case-insensitive, order-independent comparison of two tag lists.
pub fn same_type_set(a: &[String], b: &[String]) -> bool {
    let contains = |list: &[String], t: &str| list.iter().any(|x| x.eq_ignore_ascii_case(t));
    a.iter().all(|t| contains(b, t)) && b.iter().all(|t| contains(a, t))
}

/// First item carrying `item_type`.
pub fn find_by_type<'a>(items: &'a [TypedValue], item_type: &str) -> Option<&'a TypedValue> {
    items.iter().find(|item| item.has_type(item_type))
}

/// The first value, overridden by the last one tagged `pref`.
pub fn preferred_value(items: &[TypedValue]) -> Option<&str> {
    let first = items.first()?;
    let preferred = items.iter().rev().find(|item| item.has_type("pref"));
    Some(preferred.unwrap_or(first).value.as_str())
}

/// Which multi-valued field a tag belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Phone,
    Email,
    Address,
    Messenger,
}

// Types according to RFC 2426, plus the messenger kinds used by phone vendors.
const PHONE_TYPES: &[&str] = &[
    "home", "msg", "work", "pref", "voice", "fax", "cell", "video", "pager", "bbs", "modem", "car",
    "isdn", "pcs",
];
const EMAIL_TYPES: &[&str] = &["internet", "x400", "pref"];
const ADDRESS_TYPES: &[&str] = &["home", "work", "pref", "dom", "intl", "postal", "parcel"];
const MESSENGER_TYPES: &[&str] = &["xmpp", "icq", "skype", "pref"];

impl TypeKind {
    pub fn standard_types(self) -> &'static [&'static str] {
        match self {
            TypeKind::Phone => PHONE_TYPES,
            TypeKind::Email => EMAIL_TYPES,
            TypeKind::Address => ADDRESS_TYPES,
            TypeKind::Messenger => MESSENGER_TYPES,
        }
    }

    pub fn is_standard(self, item_type: &str) -> bool {
        self.standard_types()
            .iter()
            .any(|t| t.eq_ignore_ascii_case(item_type))
    }

    pub fn label(self) -> &'static str {
        match self {
            TypeKind::Phone => "phone",
            TypeKind::Email => "email",
            TypeKind::Address => "address",
            TypeKind::Messenger => "messenger",
        }
    }
}
