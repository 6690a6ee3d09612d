//! Event classification: turns one row transition into counter deltas.
//!
//! RULE: Classification is a pure function of (operation, old, new, extra).
//! It never reads storage, never reads current totals, never logs.
//! Replaying the same transition always yields the same deltas.
//!
//! RULE: Only transitions listed in a rule table produce deltas.
//! Anything unmatched yields an empty CounterSet. Nothing is guessed.
//!
//! Rule tables are evaluated per counter: for each counter the first
//! matching rule wins, so one event contributes at most one delta to any
//! counter, while still being free to fire several counters at once.

use crate::{
    broadcast_classifier::BroadcastStatsClassifier,
    counter::CounterSet,
    event::{numeric_field, ExtraFields, RowChange, RowEvent},
    types::{AggregateKey, Operation, Scope},
    unseen_classifier::UnseenCountClassifier,
};

/// Shorthand for rules that apply to both inserts and updates.
pub const INSERT_OR_UPDATE: &[Operation] = &[Operation::Insert, Operation::Update];

/// An observed transition of one source entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change<S> {
    pub op:  Operation,
    pub old: Option<S>,
    pub new: Option<S>,
}

impl<S: PartialEq> Change<S> {
    /// An update that leaves the observed state untouched.
    pub fn is_noop_update(&self) -> bool {
        self.op == Operation::Update && self.old == self.new
    }
}

/// How much a matching rule adds to its counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Amount {
    Fixed(i64),
    /// Value of a numeric extra field; missing or malformed reads as 0.
    Field(&'static str),
}

impl Amount {
    fn resolve(&self, extra: &ExtraFields) -> i64 {
        match self {
            Self::Fixed(n) => *n,
            Self::Field(name) => numeric_field(extra, name),
        }
    }
}

/// One row of a rule table.
#[derive(Debug)]
pub struct Rule<S: 'static> {
    pub counter: &'static str,
    pub ops:     &'static [Operation],
    /// Allowed old states. None: the old state is not consulted.
    pub old:     Option<&'static [S]>,
    /// Allowed new states. None: the new state is not consulted.
    pub new:     Option<&'static [S]>,
    pub amount:  Amount,
}

impl<S: PartialEq> Rule<S> {
    pub fn matches(&self, change: &Change<S>) -> bool {
        self.ops.contains(&change.op)
            && state_matches(self.old, change.old.as_ref())
            && state_matches(self.new, change.new.as_ref())
    }
}

fn state_matches<S: PartialEq>(allowed: Option<&[S]>, observed: Option<&S>) -> bool {
    match allowed {
        None => true,
        Some(set) => observed.is_some_and(|state| set.contains(state)),
    }
}

/// A fixed, ordered rule table.
#[derive(Debug)]
pub struct RuleTable<S: 'static> {
    rules: &'static [Rule<S>],
}

impl<S: PartialEq> RuleTable<S> {
    pub const fn new(rules: &'static [Rule<S>]) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &'static [Rule<S>] {
        self.rules
    }

    pub fn evaluate(&self, change: &Change<S>, extra: &ExtraFields) -> CounterSet {
        let mut deltas = CounterSet::new();
        if change.is_noop_update() {
            return deltas;
        }

        let mut fired: Vec<&'static str> = Vec::new();
        for rule in self.rules {
            if fired.contains(&rule.counter) || !rule.matches(change) {
                continue;
            }
            fired.push(rule.counter);

            let amount = rule.amount.resolve(extra);
            if amount != 0 {
                deltas.add(rule.counter, amount);
            }
        }
        deltas
    }
}

/// The seam every aggregate family implements.
pub trait Classifier {
    type State: PartialEq;

    /// The scope whose counters this classifier produces.
    fn scope(&self) -> Scope;

    fn classify(&self, change: &Change<Self::State>, extra: &ExtraFields) -> CounterSet;
}

/// Result of classifying one RowEvent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    /// None when the source entity belongs to no aggregate.
    pub key:    Option<AggregateKey>,
    pub deltas: CounterSet,
}

impl Classified {
    /// True when nothing needs to be written for this event.
    pub fn is_empty(&self) -> bool {
        self.key.is_none() || self.deltas.is_empty()
    }
}

/// Route a RowEvent to the classifier for its change type.
pub fn classify_event(event: &RowEvent) -> Classified {
    let key = event.change.aggregate_key();
    if key.is_none() {
        return Classified { key, deltas: CounterSet::new() };
    }

    let deltas = match &event.change {
        RowChange::MsgStatus { old_status, new_status, .. } => BroadcastStatsClassifier.classify(
            &Change { op: event.op, old: *old_status, new: *new_status },
            &event.extra,
        ),
        RowChange::NotificationSeen { old_seen, new_seen, .. } => UnseenCountClassifier.classify(
            &Change { op: event.op, old: *old_seen, new: *new_seen },
            &event.extra,
        ),
    };
    Classified { key, deltas }
}
