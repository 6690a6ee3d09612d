//! Unseen notification count per (org, user).
//!
//! The state observed is the notification's `is_seen` flag.
//! Inserting an unseen notification adds one, deleting one removes one,
//! and flipping the flag moves the count in the flip's direction.

use crate::{
    classifier::{Amount, Change, Classifier, Rule, RuleTable},
    counter::CounterSet,
    event::ExtraFields,
    types::{Operation, Scope},
};

const SEEN: &[bool] = &[true];
const UNSEEN: &[bool] = &[false];

static RULES: [Rule<bool>; 4] = [
    Rule { counter: "unseen", ops: &[Operation::Insert], old: None, new: Some(UNSEEN), amount: Amount::Fixed(1) },
    Rule { counter: "unseen", ops: &[Operation::Update], old: Some(SEEN), new: Some(UNSEEN), amount: Amount::Fixed(1) },
    Rule { counter: "unseen", ops: &[Operation::Update], old: Some(UNSEEN), new: Some(SEEN), amount: Amount::Fixed(-1) },
    Rule { counter: "unseen", ops: &[Operation::Delete], old: Some(UNSEEN), new: None, amount: Amount::Fixed(-1) },
];

static TABLE: RuleTable<bool> = RuleTable::new(&RULES);

#[derive(Debug, Clone, Copy, Default)]
pub struct UnseenCountClassifier;

impl UnseenCountClassifier {
    pub fn table() -> &'static RuleTable<bool> {
        &TABLE
    }
}

impl Classifier for UnseenCountClassifier {
    type State = bool;

    fn scope(&self) -> Scope {
        Scope::Notification
    }

    fn classify(&self, change: &Change<bool>, extra: &ExtraFields) -> CounterSet {
        TABLE.evaluate(change, extra)
    }
}
