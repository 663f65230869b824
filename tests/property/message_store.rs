//! Property-based tests for `MessageStore` merge laws.
//!
//! Uses proptest to verify, over random sequences of live appends, history
//! seeds, and read marks drawn from a small id pool:
//! 1. The store never holds two entries with the same id.
//! 2. No id is ever lost once stored.
//! 3. `read` never reverts from `true` to `false`.
//! 4. After a seed, the store starts with the history in server order.

use std::collections::{HashMap, HashSet};

use bookchat::chat::MessageStore;
use bookchat_proto::message::{ChatMessage, MessageId, MessageType, UserId};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Append(ChatMessage),
    Seed(Vec<ChatMessage>),
    MarkRead(MessageId),
}

/// Ids from a pool small enough that collisions are common.
fn arb_id() -> impl Strategy<Value = MessageId> {
    (0u8..12).prop_map(|n| MessageId::new(format!("m{n}")))
}

fn arb_message() -> impl Strategy<Value = ChatMessage> {
    (arb_id(), any::<bool>(), "[a-z ]{1,16}", 0i64..1_000_000).prop_map(
        |(id, read, content, offset)| ChatMessage {
            id,
            sender_id: UserId::new("bob"),
            recipient_id: UserId::new("alice"),
            content,
            kind: MessageType::Text,
            timestamp: Utc.timestamp_opt(1_700_000_000 + offset, 0).unwrap(),
            read,
            file_name: None,
        },
    )
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => arb_message().prop_map(Op::Append),
        1 => prop::collection::vec(arb_message(), 0..10).prop_map(Op::Seed),
        2 => arb_id().prop_map(Op::MarkRead),
    ]
}

fn ids(store: &MessageStore) -> Vec<MessageId> {
    store.iter().map(|m| m.id.clone()).collect()
}

/// History ids in first-occurrence order.
fn dedup_ids(history: &[ChatMessage]) -> Vec<MessageId> {
    let mut seen = HashSet::new();
    history
        .iter()
        .filter(|m| seen.insert(m.id.clone()))
        .map(|m| m.id.clone())
        .collect()
}

proptest! {
    #[test]
    fn merge_laws_hold(ops in prop::collection::vec(arb_op(), 0..40)) {
        let mut store = MessageStore::new();
        let mut stored: HashSet<MessageId> = HashSet::new();
        let mut read: HashMap<MessageId, bool> = HashMap::new();

        for op in ops {
            match op {
                Op::Append(message) => {
                    let id = message.id.clone();
                    let is_new = store.append(message);
                    prop_assert_eq!(is_new, stored.insert(id));
                }
                Op::Seed(history) => {
                    let expected_prefix = dedup_ids(&history);
                    stored.extend(history.iter().map(|m| m.id.clone()));
                    store.seed_history(history);
                    let order = ids(&store);
                    prop_assert_eq!(&order[..expected_prefix.len()], expected_prefix.as_slice());
                }
                Op::MarkRead(id) => {
                    let known = store.mark_read(&id);
                    prop_assert_eq!(known, stored.contains(&id));
                }
            }

            let order = ids(&store);
            let unique: HashSet<_> = order.iter().cloned().collect();
            prop_assert_eq!(unique.len(), order.len(), "duplicate id in {:?}", order);
            prop_assert_eq!(&unique, &stored);
            prop_assert_eq!(store.len(), stored.len());

            for message in store.iter() {
                let was_read = read.get(&message.id).copied().unwrap_or(false);
                prop_assert!(!was_read || message.read, "read reverted for {}", message.id);
                read.insert(message.id.clone(), message.read);
            }
        }
    }

    #[test]
    fn seeding_same_history_twice_is_idempotent(
        history in prop::collection::vec(arb_message(), 0..15),
        live in prop::collection::vec(arb_message(), 0..15),
    ) {
        let mut store = MessageStore::new();
        for message in live {
            store.append(message);
        }
        store.seed_history(history.clone());
        let once = store.to_vec();
        store.seed_history(history);
        prop_assert_eq!(store.to_vec(), once);
    }

    #[test]
    fn live_messages_absent_from_history_keep_relative_order(
        history in prop::collection::vec(arb_message(), 0..10),
        live in prop::collection::vec(arb_message(), 0..10),
    ) {
        let mut store = MessageStore::new();
        for message in &live {
            store.append(message.clone());
        }
        let live_order = ids(&store);
        let history_ids: HashSet<_> = history.iter().map(|m| m.id.clone()).collect();

        store.seed_history(history.clone());
        let order = ids(&store);
        let prefix = dedup_ids(&history);
        let tail: Vec<_> = live_order
            .into_iter()
            .filter(|id| !history_ids.contains(id))
            .collect();

        prop_assert_eq!(&order[..prefix.len()], prefix.as_slice());
        prop_assert_eq!(&order[prefix.len()..], tail.as_slice());
    }
}
