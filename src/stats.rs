use std::fmt;

use serde::Serialize;

use crate::contact::ContactList;

/// Read-only summary of a list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub records: usize,
    pub phones: usize,
    pub emails: usize,
    pub addresses: usize,
    pub birthdays: usize,
    pub calls: usize,
    pub sms: usize,
    pub sms_archive: usize,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
}

impl ContactList {
    pub fn statistics(&self) -> Statistics {
        let mut stats = Statistics {
            records: self.items.len(),
            calls: self.extra.calls.len(),
            sms: self.extra.sms.len(),
            sms_archive: self.extra.sms_archive.len(),
            model: self.extra.model.clone(),
            timestamp: self.extra.time_stamp.clone(),
            ..Default::default()
        };
        for item in &self.items {
            stats.phones += item.phones.len();
            stats.emails += item.emails.len();
            stats.addresses += item.addrs.len();
            if item.birthday.is_some() {
                stats.birthdays += 1;
            }
        }
        stats
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} records", self.records)?;
        writeln!(f, "{} phones", self.phones)?;
        writeln!(f, "{} emails", self.emails)?;
        writeln!(f, "{} addresses", self.addresses)?;
        writeln!(f, "{} birthdays", self.birthdays)?;
        writeln!(f, "{} calls", self.calls)?;
        writeln!(f, "{} SMS", self.sms)?;
        write!(f, "{} archived SMS", self.sms_archive)?;
        if !self.model.is_empty() {
            write!(f, "\nmodel: {}", self.model)?;
        }
        if !self.timestamp.is_empty() {
            write!(f, "\ntimestamp: {}", self.timestamp)?;
        }
        Ok(())
    }
}
