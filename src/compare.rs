//! Pairing of two contact lists: identical, similar or unpaired records.
//!
//! The engine only annotates `pair_state`/`pair_index`; it never merges or
//! deletes records. Pairings are a snapshot and are invalidated by any
//! structural edit to either list.

use rayon::prelude::*;
use tracing::debug;

use crate::contact::{ContactItem, ContactList};
use crate::country::CountryRule;

/// Similarity tiers, checked in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchLevel {
    /// Shared phone number, email or messenger handle.
    SharedContact = 1,
    /// Same stable identifier.
    SameId = 2,
    /// Same postal address.
    SameAddress = 3,
    /// Same display name or same (possibly swapped) first/last names.
    SameName = 4,
    /// Same nickname.
    SameNickname = 5,
}

impl MatchLevel {
    pub const ALL: [MatchLevel; 5] = [
        MatchLevel::SharedContact,
        MatchLevel::SameId,
        MatchLevel::SameAddress,
        MatchLevel::SameName,
        MatchLevel::SameNickname,
    ];

    pub fn priority(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PairState {
    #[default]
    NotFound,
    Identical,
    Similar(MatchLevel),
}

/// Knobs for the similarity rules.
#[derive(Debug, Clone, Copy)]
pub struct MatchOptions {
    /// Phones are compared after expansion under this rule.
    pub country_rule: CountryRule,
    /// Reproduce the historic name rule, which compared the first name of the
    /// left record with itself instead of with the candidate's.
    pub legacy_name_rule: bool,
}

impl MatchOptions {
    pub fn new(country_rule: CountryRule) -> Self {
        Self {
            country_rule,
            legacy_name_rule: false,
        }
    }
}

impl ContactItem {
    /// Every significant field set is pairwise equal.
    pub fn identical_to(&self, pair: &ContactItem) -> bool {
        self.full_name == pair.full_name
            && self.names == pair.names
            && self.phones == pair.phones
            && self.emails == pair.emails
            && self.birthday == pair.birthday
            && self.anniversaries == pair.anniversaries
            && self.sort_string == pair.sort_string
            && self.description == pair.description
            && self.photo == pair.photo
            && self.organization == pair.organization
            && self.title == pair.title
            && self.addrs == pair.addrs
            && self.nick_name == pair.nick_name
            && self.url == pair.url
            && self.ims == pair.ims
    }

    pub fn similar_to(&self, pair: &ContactItem, level: MatchLevel, opts: &MatchOptions) -> bool {
        match level {
            MatchLevel::SharedContact => {
                let rule = &opts.country_rule;
                let phones = self.phones.iter().any(|p| {
                    let expanded = rule.expand_number(&p.value);
                    pair.phones
                        .iter()
                        .any(|q| rule.expand_number(&q.value) == expanded)
                });
                phones
                    || any_same_ignoring_case(
                        self.emails.iter().map(|e| e.value.as_str()),
                        pair.emails.iter().map(|e| e.value.as_str()),
                    )
                    || any_same_ignoring_case(
                        self.ims.iter().map(|m| m.value.as_str()),
                        pair.ims.iter().map(|m| m.value.as_str()),
                    )
            }
            MatchLevel::SameId => self.id.chars().count() > 4 && self.id == pair.id,
            MatchLevel::SameAddress => self
                .addrs
                .iter()
                .any(|a| pair.addrs.iter().any(|b| a.same_location(b))),
            MatchLevel::SameName => {
                if !self.full_name.is_empty() && self.full_name == pair.full_name {
                    return true;
                }
                if self.names.len() < 2
                    || pair.names.len() < 2
                    || self.names[0].is_empty()
                    || self.names[1].is_empty()
                {
                    return false;
                }
                let (last, first) = (upper(&self.names[0]), upper(&self.names[1]));
                let (pair_last, pair_first) = (upper(&pair.names[0]), upper(&pair.names[1]));
                if opts.legacy_name_rule {
                    (last == pair_first && first == last) || last == pair_last
                } else {
                    (last == pair_first && first == pair_last)
                        || (last == pair_last && first == pair_first)
                }
            }
            MatchLevel::SameNickname => {
                !self.nick_name.is_empty() && self.nick_name == pair.nick_name
            }
        }
    }

    /// Best counterpart in `candidates`: the first identical record, else the
    /// first record of the lowest matching similarity level.
    pub fn find_pair(
        &self,
        candidates: &[ContactItem],
        opts: &MatchOptions,
    ) -> Option<(usize, PairState)> {
        self.find_pair_where(candidates, opts, |_| true)
    }

    /// Like [`ContactItem::find_pair`], considering only the candidates whose
    /// index passes `available`.
    pub fn find_pair_where(
        &self,
        candidates: &[ContactItem],
        opts: &MatchOptions,
        available: impl Fn(usize) -> bool,
    ) -> Option<(usize, PairState)> {
        let position = |matches: &dyn Fn(&ContactItem) -> bool| {
            candidates
                .iter()
                .enumerate()
                .position(|(j, c)| available(j) && matches(c))
        };
        if let Some(j) = position(&|c| self.identical_to(c)) {
            return Some((j, PairState::Identical));
        }
        MatchLevel::ALL.iter().find_map(|&level| {
            position(&|c| self.similar_to(c, level, opts)).map(|j| (j, PairState::Similar(level)))
        })
    }
}

fn upper(s: &str) -> String {
    s.to_uppercase()
}

fn any_same_ignoring_case<'a, A, B>(left: A, right: B) -> bool
where
    A: IntoIterator<Item = &'a str>,
    B: IntoIterator<Item = &'a str> + Clone,
{
    left.into_iter().any(|l| {
        let l = upper(l);
        right.clone().into_iter().any(|r| upper(r) == l)
    })
}

/// Pair every record of `list` with at most one record of `pair_list`.
///
/// Candidate search runs in parallel; results are applied in `list` order.
/// A counterpart already claimed by an earlier record is not shared: the later
/// record searches again among the unclaimed ones.
pub fn compare_with(list: &mut ContactList, pair_list: &mut ContactList, opts: &MatchOptions) {
    for item in pair_list.iter_mut() {
        item.reset_pairing();
    }

    let found: Vec<Option<(usize, PairState)>> = {
        let candidates: &[ContactItem] = &pair_list.items;
        list.items
            .par_iter()
            .map(|item| item.find_pair(candidates, opts))
            .collect()
    };

    let mut claimed = vec![false; pair_list.len()];
    let mut paired = 0usize;
    for (i, result) in found.into_iter().enumerate() {
        list[i].reset_pairing();
        let result = match result {
            Some((j, _)) if claimed[j] => {
                list[i].find_pair_where(&pair_list.items, opts, |k| !claimed[k])
            }
            other => other,
        };
        if let Some((j, state)) = result {
            claimed[j] = true;
            let item = &mut list[i];
            item.pair_state = state;
            item.pair_index = Some(j);
            let candidate = &mut pair_list[j];
            candidate.pair_state = state;
            candidate.pair_index = Some(i);
            paired += 1;
        }
    }
    debug!(records = list.len(), paired, "comparison finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::PostalAddress;
    use crate::typed::TypedValue;

    const NANP: CountryRule = CountryRule {
        country: "NANP",
        national_prefix: "1",
        international_prefix: "+1",
    };

    fn opts() -> MatchOptions {
        MatchOptions::new(NANP)
    }

    fn named(last: &str, first: &str) -> ContactItem {
        ContactItem {
            names: vec![last.to_string(), first.to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn identical_records_pair_first() {
        let a = ContactItem {
            full_name: "Ann".into(),
            phones: vec![TypedValue::new("123")],
            ..Default::default()
        };
        let mut left = ContactList::from(vec![a.clone()]);
        let mut right = ContactList::from(vec![named("x", "y"), a]);
        compare_with(&mut left, &mut right, &opts());
        assert_eq!(left[0].pair_state, PairState::Identical);
        assert_eq!(left[0].pair_index, Some(1));
        assert_eq!(right[1].pair_state, PairState::Identical);
        assert_eq!(right[1].pair_index, Some(0));
        assert_eq!(right[0].pair_state, PairState::NotFound);
    }

    #[test]
    fn shared_phone_after_prefix_expansion() {
        let r1 = ContactItem {
            full_name: "A".into(),
            phones: vec![TypedValue::with_types("+1-555", ["pref"])],
            ..Default::default()
        };
        let r2 = ContactItem {
            full_name: "B".into(),
            phones: vec![TypedValue::with_types("1-555", ["home"])],
            ..Default::default()
        };
        let mut left = ContactList::from(vec![r1]);
        let mut right = ContactList::from(vec![r2]);
        compare_with(&mut left, &mut right, &opts());
        assert_eq!(left[0].pair_state, PairState::Similar(MatchLevel::SharedContact));
        assert_eq!(right[0].pair_state, PairState::Similar(MatchLevel::SharedContact));
    }

    #[test]
    fn lower_level_wins_over_name_match() {
        let mut a = named("Smith", "John");
        a.phones.push(TypedValue::new("555"));
        let mut reversed = named("John", "Smith");
        reversed.phones.push(TypedValue::new("777"));
        let mut b = named("John", "Smith");
        b.phones.push(TypedValue::new("555"));

        let mut left = ContactList::from(vec![a]);
        let mut right = ContactList::from(vec![reversed, b]);
        compare_with(&mut left, &mut right, &opts());
        assert_eq!(left[0].pair_state, PairState::Similar(MatchLevel::SharedContact));
        assert_eq!(left[0].pair_index, Some(1));
        assert_eq!(right[0].pair_state, PairState::NotFound);
    }

    #[test]
    fn email_and_messenger_ignore_case() {
        let a = ContactItem {
            emails: vec![TypedValue::new("Ann@Example.com")],
            ..Default::default()
        };
        let b = ContactItem {
            emails: vec![TypedValue::new("ann@example.COM")],
            ..Default::default()
        };
        assert!(a.similar_to(&b, MatchLevel::SharedContact, &opts()));

        let c = ContactItem {
            ims: vec![TypedValue::with_types("Ann@Jabber.org", ["xmpp"])],
            ..Default::default()
        };
        let d = ContactItem {
            ims: vec![TypedValue::new("ann@jabber.org")],
            ..Default::default()
        };
        assert!(c.similar_to(&d, MatchLevel::SharedContact, &opts()));
    }

    #[test]
    fn id_needs_more_than_four_chars() {
        let short = ContactItem {
            id: "1234".into(),
            ..Default::default()
        };
        assert!(!short.similar_to(&short.clone(), MatchLevel::SameId, &opts()));
        let long = ContactItem {
            id: "12345".into(),
            ..Default::default()
        };
        assert!(long.similar_to(&long.clone(), MatchLevel::SameId, &opts()));
    }

    #[test]
    fn address_similarity_ignores_types() {
        let addr = PostalAddress {
            types: vec!["home".into()],
            street: "Main 1".into(),
            ..Default::default()
        };
        let mut other = addr.clone();
        other.types = vec!["work".into()];
        let a = ContactItem {
            addrs: vec![addr],
            ..Default::default()
        };
        let b = ContactItem {
            addrs: vec![other],
            ..Default::default()
        };
        assert!(!a.identical_to(&b));
        assert!(a.similar_to(&b, MatchLevel::SameAddress, &opts()));
    }

    #[test]
    fn name_rule_compares_both_components() {
        let a = named("Smith", "John");
        assert!(a.similar_to(&named("SMITH", "john"), MatchLevel::SameName, &opts()));
        assert!(a.similar_to(&named("John", "Smith"), MatchLevel::SameName, &opts()));
        assert!(!a.similar_to(&named("Smith", "Jane"), MatchLevel::SameName, &opts()));
    }

    #[test]
    fn legacy_name_rule_only_checks_last_name() {
        let legacy = MatchOptions {
            legacy_name_rule: true,
            ..opts()
        };
        let a = named("Smith", "John");
        assert!(a.similar_to(&named("Smith", "Jane"), MatchLevel::SameName, &legacy));
    }

    #[test]
    fn name_rule_requires_both_left_components() {
        let a = named("", "John");
        assert!(!a.similar_to(&named("", "John"), MatchLevel::SameName, &opts()));
        let full = ContactItem {
            full_name: "John".into(),
            ..Default::default()
        };
        assert!(full.similar_to(&full.clone(), MatchLevel::SameName, &opts()));
    }

    #[test]
    fn nickname_is_the_last_resort() {
        let a = ContactItem {
            nick_name: "Bear".into(),
            ..Default::default()
        };
        let b = ContactItem {
            nick_name: "Bear".into(),
            title: "Boss".into(),
            ..Default::default()
        };
        let mut left = ContactList::from(vec![a]);
        let mut right = ContactList::from(vec![b]);
        compare_with(&mut left, &mut right, &opts());
        assert_eq!(left[0].pair_state, PairState::Similar(MatchLevel::SameNickname));
    }

    #[test]
    fn pairing_is_symmetric() {
        let mut left = ContactList::from(vec![
            named("Doe", "Jane"),
            ContactItem {
                emails: vec![TypedValue::new("x@y.z")],
                ..Default::default()
            },
            named("Nobody", "Here"),
        ]);
        let mut right = ContactList::from(vec![
            ContactItem {
                emails: vec![TypedValue::new("X@Y.Z")],
                ..Default::default()
            },
            named("Jane", "Doe"),
        ]);
        compare_with(&mut left, &mut right, &opts());
        for (i, item) in left.iter().enumerate() {
            if let Some(j) = item.pair_index {
                assert_eq!(right[j].pair_index, Some(i));
                assert_eq!(right[j].pair_state, item.pair_state);
            }
        }
        assert_eq!(left[2].pair_state, PairState::NotFound);
        assert_eq!(left[2].pair_index, None);
    }

    #[test]
    fn comparing_again_resets_stale_pairs() {
        let mut left = ContactList::from(vec![named("Doe", "Jane")]);
        let mut right = ContactList::from(vec![named("Doe", "Jane")]);
        compare_with(&mut left, &mut right, &opts());
        assert_eq!(right[0].pair_state, PairState::Identical);

        left[0].names = vec!["Other".into(), "Name".into()];
        compare_with(&mut left, &mut right, &opts());
        assert_eq!(left[0].pair_state, PairState::NotFound);
        assert_eq!(right[0].pair_state, PairState::NotFound);
        assert_eq!(right[0].pair_index, None);
    }

    #[test]
    fn claimed_counterpart_is_not_shared() {
        let rule = *crate::country::rule(1).unwrap();
        let phone = |v: &str| ContactItem {
            phones: vec![TypedValue::new(v)],
            ..Default::default()
        };
        let mut left = ContactList::from(vec![
            phone("89160000000"),
            phone("+79160000000"),
            named("Doe", "Jane"),
        ]);
        let mut right = ContactList::from(vec![phone("+79160000000"), named("Jane", "Doe")]);
        compare_with(&mut left, &mut right, &MatchOptions::new(rule));

        assert_eq!(left[0].pair_index, Some(0));
        assert_eq!(left[0].pair_state, PairState::Similar(MatchLevel::SharedContact));
        assert_eq!(left[1].pair_state, PairState::NotFound);
        assert_eq!(left[1].pair_index, None);
        assert_eq!(right[0].pair_index, Some(0));
        for (i, item) in left.iter().enumerate() {
            if let Some(j) = item.pair_index {
                assert_eq!(right[j].pair_index, Some(i));
            }
        }
        let claims = left.iter().filter(|c| c.pair_index == Some(0)).count();
        assert_eq!(claims, 1);
    }

    #[test]
    fn later_record_falls_back_to_unclaimed_counterpart() {
        let mut left = ContactList::from(vec![named("Doe", "Jane"), named("Doe", "Jane")]);
        let mut right = ContactList::from(vec![named("Doe", "Jane"), named("Jane", "Doe")]);
        compare_with(&mut left, &mut right, &opts());
        assert_eq!(left[0].pair_state, PairState::Identical);
        assert_eq!(left[0].pair_index, Some(0));
        assert_eq!(left[1].pair_state, PairState::Similar(MatchLevel::SameName));
        assert_eq!(left[1].pair_index, Some(1));
        assert_eq!(right[1].pair_index, Some(1));
    }
}
