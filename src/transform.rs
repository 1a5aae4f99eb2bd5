//! Per-record name and number transformations.

use tracing::debug;

use crate::contact::{ContactItem, ContactList};
use crate::country::CountryRule;

/// Independently switchable operations, applied in declaration order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transformations {
    pub swap_names: bool,
    pub split_names: bool,
    pub generate_full_names: bool,
    pub drop_full_names: bool,
    pub reverse_full_names: bool,
    pub drop_slashes: bool,
    /// Expand national phone prefixes under this rule.
    pub intl_phone_prefix: Option<CountryRule>,
}

impl Transformations {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to_item(&self, item: &mut ContactItem) {
        if self.swap_names {
            item.swap_names();
        }
        if self.split_names {
            item.split_names();
        }
        if self.generate_full_names {
            item.full_name = item.format_names();
        }
        if self.drop_full_names {
            item.full_name.clear();
        }
        if self.reverse_full_names {
            item.reverse_full_name();
        }
        if self.drop_slashes {
            item.drop_slashes();
        }
        if let Some(rule) = &self.intl_phone_prefix {
            item.intl_phone_prefix(rule);
        }
    }

    pub fn apply(&self, list: &mut ContactList) {
        if self.is_empty() {
            return;
        }
        for item in list.iter_mut() {
            self.apply_to_item(item);
        }
        debug!(records = list.len(), ?self, "transformations applied");
    }
}

impl ContactItem {
    /// Exchange last and first name. A lone component is padded first.
    pub fn swap_names(&mut self) -> bool {
        if self.names.is_empty() {
            return false;
        }
        if self.names.len() == 1 {
            self.names.push(String::new());
        }
        self.names.swap(0, 1);
        self.drop_final_empty_names();
        true
    }

    /// Split each component at its first space, appending the remainder as a
    /// new trailing component. Appended components are not split again.
    pub fn split_names(&mut self) -> bool {
        self.drop_final_empty_names();
        let mut changed = false;
        for i in 0..self.names.len() {
            if let Some((head, tail)) = self.names[i].split_once(' ') {
                let (head, tail) = (head.to_string(), tail.to_string());
                self.names[i] = head;
                self.names.push(tail);
                changed = true;
            }
        }
        self.drop_final_empty_names();
        changed
    }

    /// Swap the text before and after the first space of the full name.
    pub fn reverse_full_name(&mut self) {
        if let Some((head, tail)) = self.full_name.split_once(' ') {
            self.full_name = format!("{tail} {head}");
        }
    }

    /// Strip SIM storage leftovers: a trailing backslash and a trailing
    /// `/digit` slot marker.
    pub fn drop_slashes(&mut self) -> bool {
        let mut changed = false;
        for name in &mut self.names {
            if name.ends_with('\\') {
                name.pop();
                changed = true;
            }
            let chars: Vec<char> = name.chars().collect();
            let len = chars.len();
            if len > 2 && chars[len - 2] == '/' && chars[len - 1].is_ascii_digit() {
                name.pop();
                name.pop();
                changed = true;
            }
        }
        changed
    }

    /// Replace the national prefix of every phone with the international one.
    pub fn intl_phone_prefix(&mut self, rule: &CountryRule) -> bool {
        let mut changed = false;
        for phone in &mut self.phones {
            let expanded = rule.expand_number(&phone.value);
            if expanded != phone.value {
                phone.value = expanded;
                changed = true;
            }
        }
        changed
    }
}
