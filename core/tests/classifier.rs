//! Classifier tests: rule tables evaluated in isolation, no storage.

use rollup_core::{
    broadcast_classifier::{BroadcastStatsClassifier, PRICE_FIELD},
    classifier::{classify_event, Change, Classifier},
    event::{ExtraFields, MsgStatus, RowChange, RowEvent},
    types::{AggregateKey, Operation, Scope},
    unseen_classifier::UnseenCountClassifier,
    CounterSet,
};
use rollup_core::event::MsgStatus::*;

const ALL_STATUSES: [MsgStatus; 10] = [
    Initializing, Pending, Queued, Wired, Sent, Delivered, Handled, Errored, Failed, Read,
];

fn price(amount: i64) -> ExtraFields {
    let mut extra = ExtraFields::new();
    extra.insert(PRICE_FIELD.into(), amount.into());
    extra
}

fn broadcast(op: Operation, old: Option<MsgStatus>, new: MsgStatus, extra: &ExtraFields) -> CounterSet {
    BroadcastStatsClassifier.classify(&Change { op, old, new: Some(new) }, extra)
}

fn update(old: MsgStatus, new: MsgStatus) -> CounterSet {
    broadcast(Operation::Update, Some(old), new, &ExtraFields::new())
}

fn unseen(op: Operation, old: Option<bool>, new: Option<bool>) -> CounterSet {
    UnseenCountClassifier.classify(&Change { op, old, new }, &ExtraFields::new())
}

fn set(pairs: &[(&str, i64)]) -> CounterSet {
    pairs.iter().copied().collect()
}

// ── Broadcast statistics ──────────────────────────────────────────

/// Inserted directly as Sent: counts as sent and processed, and is charged.
#[test]
fn insert_sent_counts_sent_processed_and_cost() {
    let deltas = broadcast(Operation::Insert, None, Sent, &price(250));
    assert_eq!(deltas, set(&[("sent", 1), ("processed", 1), ("cost", 250)]));
}

/// Queued straight to Delivered: the provider skipped Sent.
#[test]
fn queued_to_delivered_counts_the_skipped_send() {
    assert_eq!(
        update(Queued, Delivered),
        set(&[("sent", 1), ("delivered", 1), ("processed", 1)])
    );
}

#[test]
fn wired_to_delivered_counts_send_but_not_processed() {
    // processed was already counted when the message left Queued.
    assert_eq!(update(Wired, Delivered), set(&[("sent", 1), ("delivered", 1)]));
}

#[test]
fn read_implies_sent_and_delivered_when_skipped() {
    assert_eq!(
        update(Queued, Read),
        set(&[("sent", 1), ("delivered", 1), ("read", 1), ("processed", 1)])
    );
    assert_eq!(update(Wired, Read), set(&[("sent", 1), ("delivered", 1), ("read", 1)]));
    assert_eq!(update(Sent, Read), set(&[("delivered", 1), ("read", 1)]));
    assert_eq!(update(Delivered, Read), set(&[("read", 1)]));
}

#[test]
fn insert_as_read_counts_every_stage() {
    let deltas = broadcast(Operation::Insert, None, Read, &ExtraFields::new());
    assert_eq!(
        deltas,
        set(&[("sent", 1), ("delivered", 1), ("read", 1), ("processed", 1)])
    );
}

#[test]
fn normal_progression_counts_each_stage_once() {
    let extra = price(40);
    let mut total = CounterSet::new();
    total.merge(&broadcast(Operation::Insert, None, Queued, &extra));
    total.merge(&broadcast(Operation::Update, Some(Queued), Wired, &extra));
    total.merge(&broadcast(Operation::Update, Some(Wired), Sent, &extra));
    total.merge(&broadcast(Operation::Update, Some(Sent), Delivered, &extra));
    total.merge(&broadcast(Operation::Update, Some(Delivered), Read, &extra));
    assert_eq!(
        total,
        set(&[("sent", 1), ("delivered", 1), ("read", 1), ("processed", 1), ("cost", 40)])
    );
}

#[test]
fn failure_counts_failed_and_processed_when_leaving_queue() {
    assert_eq!(update(Queued, Failed), set(&[("failed", 1), ("processed", 1)]));
    assert_eq!(update(Sent, Failed), set(&[("failed", 1)]));
}

/// Cost uses the price on the event; a missing price is charged as zero.
#[test]
fn missing_price_is_zero_cost() {
    let deltas = update(Queued, Sent);
    assert_eq!(deltas.get("cost"), 0);
    assert!(!deltas.contains("cost"), "zero cost should not be written: {deltas:?}");
    assert_eq!(deltas, set(&[("sent", 1), ("processed", 1)]));

    let mut malformed = ExtraFields::new();
    malformed.insert(PRICE_FIELD.into(), "free".into());
    let deltas = broadcast(Operation::Update, Some(Wired), Sent, &malformed);
    assert_eq!(deltas, set(&[("sent", 1)]));
}

#[test]
fn cost_only_charged_on_transition_into_sent() {
    let extra = price(99);
    assert_eq!(broadcast(Operation::Update, Some(Sent), Delivered, &extra).get("cost"), 0);
    assert_eq!(broadcast(Operation::Update, Some(Queued), Delivered, &extra).get("cost"), 0);
    assert_eq!(broadcast(Operation::Update, Some(Queued), Sent, &extra).get("cost"), 99);
}

/// An update that does not change the status never counts.
#[test]
fn same_status_update_is_empty() {
    for status in ALL_STATUSES {
        let deltas = broadcast(Operation::Update, Some(status), status, &price(10));
        assert!(deltas.is_empty(), "{status:?} -> {status:?} produced {deltas:?}");
    }
}

/// Transitions not listed in the table produce nothing.
#[test]
fn unmapped_transitions_are_empty() {
    assert!(broadcast(Operation::Insert, None, Queued, &price(5)).is_empty());
    assert!(broadcast(Operation::Insert, None, Pending, &price(5)).is_empty());
    assert!(update(Pending, Queued).is_empty());
    assert!(update(Delivered, Handled).is_empty());
    assert!(update(Errored, Queued).is_empty());

    let delete = BroadcastStatsClassifier.classify(
        &Change { op: Operation::Delete, old: Some(Sent), new: None },
        &price(5),
    );
    assert!(delete.is_empty(), "deletes are never counted: {delete:?}");
}

/// Every possible transition: deterministic, at most one delta per counter,
/// and every non-cost delta is exactly +1.
#[test]
fn every_transition_is_deterministic_and_bounded() {
    let extra = price(7);
    let ops = [Operation::Insert, Operation::Update, Operation::Delete];
    let olds: Vec<Option<MsgStatus>> =
        std::iter::once(None).chain(ALL_STATUSES.iter().copied().map(Some)).collect();

    for op in ops {
        for old in &olds {
            for new in ALL_STATUSES {
                let change = Change { op, old: *old, new: Some(new) };
                let first = BroadcastStatsClassifier.classify(&change, &extra);
                let second = BroadcastStatsClassifier.classify(&change, &extra);
                assert_eq!(first, second, "classification not repeatable for {change:?}");

                for (name, value) in first.iter() {
                    let expected = if name == "cost" { 7 } else { 1 };
                    assert_eq!(value, expected, "{name} delta {value} for {change:?}");
                    assert!(
                        Scope::Broadcast.counters().contains(&name),
                        "undeclared counter {name} for {change:?}"
                    );
                }
            }
        }
    }
}

// ── Unseen notifications ─────────────────────────────────────────

#[test]
fn unseen_insert_and_delete() {
    assert_eq!(unseen(Operation::Insert, None, Some(false)), set(&[("unseen", 1)]));
    assert!(unseen(Operation::Insert, None, Some(true)).is_empty());
    assert_eq!(unseen(Operation::Delete, Some(false), None), set(&[("unseen", -1)]));
    assert!(unseen(Operation::Delete, Some(true), None).is_empty());
}

#[test]
fn unseen_flips_move_in_flip_direction() {
    assert_eq!(unseen(Operation::Update, Some(false), Some(true)), set(&[("unseen", -1)]));
    assert_eq!(unseen(Operation::Update, Some(true), Some(false)), set(&[("unseen", 1)]));
    assert!(unseen(Operation::Update, Some(true), Some(true)).is_empty());
    assert!(unseen(Operation::Update, Some(false), Some(false)).is_empty());
}

/// Insert unseen, then mark seen: the two deltas cancel out.
#[test]
fn insert_unseen_then_seen_nets_to_zero() {
    let mut total = unseen(Operation::Insert, None, Some(false));
    total.merge(&unseen(Operation::Update, Some(false), Some(true)));
    assert_eq!(total.get("unseen"), 0);
}

// ── Routing ──────────────────────────────────────────────────────

#[test]
fn classify_event_routes_by_change_type() {
    let msg = RowEvent::new(
        "m-1",
        Operation::Insert,
        RowChange::MsgStatus {
            broadcast_id: Some(42),
            old_status:   None,
            new_status:   Some(Sent),
        },
    )
    .with_extra(PRICE_FIELD, 300);
    let classified = classify_event(&msg);
    assert_eq!(classified.key, Some(AggregateKey::broadcast(42)));
    assert_eq!(classified.deltas, set(&[("sent", 1), ("processed", 1), ("cost", 300)]));

    let note = RowEvent::new(
        "n-1",
        Operation::Insert,
        RowChange::NotificationSeen { org_id: 3, user_id: 9, old_seen: None, new_seen: Some(false) },
    );
    let classified = classify_event(&note);
    assert_eq!(classified.key, Some(AggregateKey::notification(3, 9)));
    assert_eq!(classified.deltas, set(&[("unseen", 1)]));
}

#[test]
fn message_outside_a_broadcast_classifies_to_nothing() {
    let msg = RowEvent::new(
        "m-2",
        Operation::Insert,
        RowChange::MsgStatus { broadcast_id: None, old_status: None, new_status: Some(Sent) },
    )
    .with_extra(PRICE_FIELD, 300);
    let classified = classify_event(&msg);
    assert!(classified.is_empty());
    assert_eq!(classified.key, None);
    assert!(classified.deltas.is_empty());
}

#[test]
fn rule_tables_name_only_declared_counters() {
    for rule in BroadcastStatsClassifier::table().rules() {
        assert!(Scope::Broadcast.counters().contains(&rule.counter), "{}", rule.counter);
    }
    for rule in UnseenCountClassifier::table().rules() {
        assert!(Scope::Notification.counters().contains(&rule.counter), "{}", rule.counter);
    }
    assert_eq!(BroadcastStatsClassifier.scope(), Scope::Broadcast);
    assert_eq!(UnseenCountClassifier.scope(), Scope::Notification);
}
