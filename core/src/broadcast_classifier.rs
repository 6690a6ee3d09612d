//! Broadcast statistics: message status transitions per broadcast.
//!
//! Counters: sent, delivered, failed, read, processed, cost.
//!
//! Some providers never report the intermediate states, so a message can
//! jump from Queued/Wired straight to Delivered or Read. Those jumps count
//! toward every counter they imply (Read implies sent and delivered).
//! Deletes are never counted.

use crate::{
    classifier::{Amount, Change, Classifier, Rule, RuleTable, INSERT_OR_UPDATE},
    counter::CounterSet,
    event::{ExtraFields, MsgStatus},
    types::{Operation, Scope},
};

use crate::event::MsgStatus::{Delivered, Failed, Queued, Read, Sent, Wired};

const INSERT: &[Operation] = &[Operation::Insert];
const UPDATE: &[Operation] = &[Operation::Update];

/// Every status past Queued that counts as "processed".
const PROCESSED: &[MsgStatus] = &[Wired, Sent, Delivered, Failed, Read];

/// Extra field holding the per-message price, in minor currency units.
pub const PRICE_FIELD: &str = "template_price";

static RULES: [Rule<MsgStatus>; 12] = [
    // sent
    Rule { counter: "sent", ops: INSERT_OR_UPDATE, old: None, new: Some(&[Sent]), amount: Amount::Fixed(1) },
    Rule { counter: "sent", ops: UPDATE, old: Some(&[Queued, Wired]), new: Some(&[Delivered]), amount: Amount::Fixed(1) },
    Rule { counter: "sent", ops: UPDATE, old: Some(&[Queued, Wired]), new: Some(&[Read]), amount: Amount::Fixed(1) },
    Rule { counter: "sent", ops: INSERT, old: None, new: Some(&[Read]), amount: Amount::Fixed(1) },
    // delivered
    Rule { counter: "delivered", ops: INSERT_OR_UPDATE, old: None, new: Some(&[Delivered]), amount: Amount::Fixed(1) },
    Rule { counter: "delivered", ops: UPDATE, old: Some(&[Queued, Wired, Sent]), new: Some(&[Read]), amount: Amount::Fixed(1) },
    Rule { counter: "delivered", ops: INSERT, old: None, new: Some(&[Read]), amount: Amount::Fixed(1) },
    // failed, read
    Rule { counter: "failed", ops: INSERT_OR_UPDATE, old: None, new: Some(&[Failed]), amount: Amount::Fixed(1) },
    Rule { counter: "read", ops: INSERT_OR_UPDATE, old: None, new: Some(&[Read]), amount: Amount::Fixed(1) },
    // processed: exactly once, when leaving Queued or when inserted past it
    Rule { counter: "processed", ops: UPDATE, old: Some(&[Queued]), new: Some(PROCESSED), amount: Amount::Fixed(1) },
    Rule { counter: "processed", ops: INSERT, old: None, new: Some(PROCESSED), amount: Amount::Fixed(1) },
    // cost
    Rule { counter: "cost", ops: INSERT_OR_UPDATE, old: None, new: Some(&[Sent]), amount: Amount::Field(PRICE_FIELD) },
];

static TABLE: RuleTable<MsgStatus> = RuleTable::new(&RULES);

/// Stateless; all behavior lives in the static rule table.
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastStatsClassifier;

impl BroadcastStatsClassifier {
    pub fn table() -> &'static RuleTable<MsgStatus> {
        &TABLE
    }
}

impl Classifier for BroadcastStatsClassifier {
    type State = MsgStatus;

    fn scope(&self) -> Scope {
        Scope::Broadcast
    }

    fn classify(&self, change: &Change<MsgStatus>, extra: &ExtraFields) -> CounterSet {
        TABLE.evaluate(change, extra)
    }
}
