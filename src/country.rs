//! Rules for phone number internationalization.

/// National to international prefix mapping for one country.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountryRule {
    pub country: &'static str,
    pub national_prefix: &'static str,
    pub international_prefix: &'static str,
}

// National country names, as shown on the phones that produce these books.
pub const COUNTRY_RULES: &[CountryRule] = &[
    CountryRule {
        country: "Беларусь",
        national_prefix: "8",
        international_prefix: "+375",
    },
    CountryRule {
        country: "Россия",
        national_prefix: "8",
        international_prefix: "+7",
    },
    CountryRule {
        country: "Україна",
        national_prefix: "0",
        international_prefix: "+380",
    },
];

pub const DEFAULT_COUNTRY_RULE: usize = 1;

/// Look a rule up by ordinal.
pub fn rule(index: usize) -> Option<&'static CountryRule> {
    COUNTRY_RULES.get(index)
}

/// Human readable list of rules, indexed like [`COUNTRY_RULES`].
pub fn available_rules() -> Vec<String> {
    COUNTRY_RULES.iter().map(CountryRule::describe).collect()
}

impl CountryRule {
    pub fn describe(&self) -> String {
        format!(
            "{} ({} -> {})",
            self.country, self.national_prefix, self.international_prefix
        )
    }

    /// Replace a leading national prefix with the international one.
    /// Numbers without the national prefix are returned unchanged.
    pub fn expand_number(&self, number: &str) -> String {
        if self.national_prefix.is_empty() {
            return number.to_string();
        }
        match number.strip_prefix(self.national_prefix) {
            Some(rest) => format!("{}{}", self.international_prefix, rest),
            None => number.to_string(),
        }
    }
}
