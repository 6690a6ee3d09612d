//! Named signed counters.
//!
//! A CounterSet is used three ways: as the delta a classifier emits for one
//! event, as the payload of a DeltaRecord, and as the totals read back for a
//! key. Values may go negative at any point; only the sum is meaningful.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CounterSet(BTreeMap<String, i64>);

impl CounterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding every name with value zero.
    pub fn zeroed(names: &[&str]) -> Self {
        Self(names.iter().map(|n| (n.to_string(), 0)).collect())
    }

    /// Value of `name`, zero if it was never touched.
    pub fn get(&self, name: &str) -> i64 {
        self.0.get(name).copied().unwrap_or(0)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Add `amount` to `name`, creating it if needed. Saturates at the i64 bounds.
    pub fn add(&mut self, name: &str, amount: i64) {
        let value = self.0.entry(name.to_string()).or_insert(0);
        *value = value.saturating_add(amount);
    }

    /// Builder form of `add`.
    pub fn with(mut self, name: &str, amount: i64) -> Self {
        self.add(name, amount);
        self
    }

    /// Sum every counter of `other` into `self`.
    pub fn merge(&mut self, other: &CounterSet) {
        for (name, amount) in &other.0 {
            self.add(name, *amount);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.0)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw).map(Self)
    }
}

impl FromIterator<(String, i64)> for CounterSet {
    fn from_iter<I: IntoIterator<Item = (String, i64)>>(iter: I) -> Self {
        let mut set = CounterSet::new();
        for (name, amount) in iter {
            set.add(&name, amount);
        }
        set
    }
}

impl<'a> FromIterator<(&'a str, i64)> for CounterSet {
    fn from_iter<I: IntoIterator<Item = (&'a str, i64)>>(iter: I) -> Self {
        let mut set = CounterSet::new();
        for (name, amount) in iter {
            set.add(name, amount);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_counter_reads_as_zero() {
        let set = CounterSet::new().with("sent", 3);
        assert_eq!(set.get("sent"), 3);
        assert_eq!(set.get("delivered"), 0);
        assert!(!set.contains("delivered"));
    }

    #[test]
    fn merge_sums_and_keeps_negatives() {
        let mut a = CounterSet::new().with("unseen", 1).with("sent", 2);
        let b = CounterSet::new().with("unseen", -3);
        a.merge(&b);
        assert_eq!(a.get("unseen"), -2);
        assert_eq!(a.get("sent"), 2);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn json_form_is_a_flat_object() {
        let set = CounterSet::new().with("sent", 1).with("cost", 250);
        assert_eq!(set.to_json().unwrap(), r#"{"cost":250,"sent":1}"#);
        assert_eq!(CounterSet::from_json(r#"{"cost":250,"sent":1}"#).unwrap(), set);
    }

    #[test]
    fn sums_saturate_instead_of_overflowing() {
        let mut a = CounterSet::new().with("cost", i64::MAX);
        a.merge(&CounterSet::new().with("cost", i64::MAX));
        assert_eq!(a.get("cost"), i64::MAX);

        let mut b = CounterSet::new().with("unseen", i64::MIN);
        b.add("unseen", -1);
        assert_eq!(b.get("unseen"), i64::MIN);
    }

    #[test]
    fn zeroed_declares_every_name() {
        let set = CounterSet::zeroed(&["sent", "read"]);
        assert_eq!(set.len(), 2);
        assert!(set.iter().all(|(_, v)| v == 0));
    }
}
