//! Conversation Table: one record per unordered pair of addresses that have
//! exchanged at least one message.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::ids::ConversationId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub address1: Address,
    pub address2: Address,
    pub content_type: String,
    pub last_msg: String,
    pub updated: DateTime<Utc>,
}

impl Conversation {
    pub fn involves(&self, address: &Address) -> bool {
        self.address1 == *address || self.address2 == *address
    }
}

/// What happens to a participant's conversations when its connection leaves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationRetention {
    /// Drop every conversation of the departing address as soon as any of its
    /// connections deregisters.
    #[default]
    DropOnDisconnect,
    /// Drop only once the address has no connection left.
    DropWhenOffline,
    /// Keep conversations; the departing side merely stops receiving.
    Retain,
}

/// Order-independent key for a pair of addresses.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct PairKey(Address, Address);

impl PairKey {
    fn new(a: &Address, b: &Address) -> Self {
        if a <= b {
            Self(a.clone(), b.clone())
        } else {
            Self(b.clone(), a.clone())
        }
    }
}

#[derive(Debug)]
pub struct ConversationTable {
    by_seq: BTreeMap<u64, Conversation>,
    by_pair: HashMap<PairKey, u64>,
    next_seq: u64,
}

impl ConversationTable {
    pub fn new() -> Self {
        Self {
            by_seq: BTreeMap::new(),
            by_pair: HashMap::new(),
            next_seq: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.by_seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_seq.is_empty()
    }

    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.by_seq.get(&id.seq())
    }

    /// Look up the conversation between `a` and `b`, in either order.
    pub fn find(&self, a: &Address, b: &Address) -> Option<&Conversation> {
        let seq = self.by_pair.get(&PairKey::new(a, b))?;
        self.by_seq.get(seq)
    }

    /// Resolve or create the conversation for the pair and stamp it with the
    /// latest message. A new conversation lists `from` as `address1`.
    pub fn record_message(
        &mut self,
        from: &Address,
        to: &Address,
        content_type: &str,
        body: &str,
        at: DateTime<Utc>,
    ) -> &Conversation {
        let key = PairKey::new(from, to);
        let seq = match self.by_pair.get(&key) {
            Some(seq) => *seq,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.by_pair.insert(key, seq);
                seq
            }
        };

        let conversation = self.by_seq.entry(seq).or_insert_with(|| Conversation {
            id: ConversationId::from_seq(seq),
            address1: from.clone(),
            address2: to.clone(),
            content_type: String::new(),
            last_msg: String::new(),
            updated: at,
        });
        conversation.content_type = content_type.to_owned();
        conversation.last_msg = body.to_owned();
        conversation.updated = at;
        conversation
    }

    /// Conversations `address` takes part in, most recently updated first.
    pub fn for_address(&self, address: &Address) -> Vec<&Conversation> {
        let mut found: Vec<&Conversation> = self
            .by_seq
            .values()
            .filter(|c| c.involves(address))
            .collect();
        // BTreeMap order is ascending by id, so a stable sort keeps ties in id order.
        found.sort_by(|a, b| b.updated.cmp(&a.updated));
        found
    }

    /// Remove every conversation `address` takes part in. Returns how many went.
    pub fn remove_for_address(&mut self, address: &Address) -> usize {
        let doomed: Vec<u64> = self
            .by_seq
            .iter()
            .filter(|(_, c)| c.involves(address))
            .map(|(seq, _)| *seq)
            .collect();

        for seq in &doomed {
            if let Some(c) = self.by_seq.remove(seq) {
                self.by_pair.remove(&PairKey::new(&c.address1, &c.address2));
            }
        }
        doomed.len()
    }
}

impl Default for ConversationTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    #[test]
    fn first_message_creates_conversation() {
        let mut table = ConversationTable::new();
        let now = Utc::now();
        let conv = table.record_message(&addr("alice"), &addr("bob"), "text", "hi", now);
        assert_eq!(conv.id.to_string(), "1");
        assert_eq!(conv.address1.as_str(), "alice");
        assert_eq!(conv.address2.as_str(), "bob");
        assert_eq!(conv.last_msg, "hi");
        assert_eq!(conv.content_type, "text");
        assert_eq!(conv.updated, now);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn pair_is_unordered() {
        let mut table = ConversationTable::new();
        let t0 = Utc::now();
        table.record_message(&addr("alice"), &addr("bob"), "text", "hi", t0);
        let conv = table.record_message(&addr("bob"), &addr("alice"), "image", "pic", t0 + Duration::seconds(1));

        assert_eq!(conv.id.to_string(), "1");
        assert_eq!(conv.address1.as_str(), "alice", "creator stays address1");
        assert_eq!(conv.last_msg, "pic");
        assert_eq!(conv.content_type, "image");
        assert_eq!(table.len(), 1);
        assert!(table.find(&addr("bob"), &addr("alice")).is_some());
    }

    #[test]
    fn ids_are_monotonic() {
        let mut table = ConversationTable::new();
        let now = Utc::now();
        table.record_message(&addr("a"), &addr("b"), "", "", now);
        table.record_message(&addr("a"), &addr("c"), "", "", now);
        table.remove_for_address(&addr("c"));
        let conv = table.record_message(&addr("a"), &addr("c"), "", "", now);
        assert_eq!(conv.id.to_string(), "3", "ids are never reused");
    }

    #[test]
    fn self_conversation_is_a_single_pair() {
        let mut table = ConversationTable::new();
        let now = Utc::now();
        table.record_message(&addr("alice"), &addr("alice"), "text", "note", now);
        table.record_message(&addr("alice"), &addr("alice"), "text", "note 2", now);
        assert_eq!(table.len(), 1);
        assert_eq!(table.for_address(&addr("alice")).len(), 1);
    }

    #[test]
    fn for_address_filters_and_orders() {
        let mut table = ConversationTable::new();
        let t0 = Utc::now();
        table.record_message(&addr("alice"), &addr("bob"), "text", "1", t0);
        table.record_message(&addr("carol"), &addr("dave"), "text", "2", t0 + Duration::seconds(1));
        table.record_message(&addr("carol"), &addr("alice"), "text", "3", t0 + Duration::seconds(2));

        let alice: Vec<&str> = table
            .for_address(&addr("alice"))
            .iter()
            .map(|c| c.last_msg.as_str())
            .collect();
        assert_eq!(alice, vec!["3", "1"]);
        assert!(table.for_address(&addr("erin")).is_empty());
    }

    #[test]
    fn remove_for_address_clears_both_indexes() {
        let mut table = ConversationTable::new();
        let now = Utc::now();
        table.record_message(&addr("alice"), &addr("bob"), "", "", now);
        table.record_message(&addr("carol"), &addr("bob"), "", "", now);
        table.record_message(&addr("carol"), &addr("dave"), "", "", now);

        assert_eq!(table.remove_for_address(&addr("bob")), 2);
        assert_eq!(table.len(), 1);
        assert!(table.find(&addr("alice"), &addr("bob")).is_none());
        assert!(table.find(&addr("carol"), &addr("dave")).is_some());
        assert_eq!(table.remove_for_address(&addr("bob")), 0);
    }

    #[test]
    fn get_by_id() {
        let mut table = ConversationTable::new();
        table.record_message(&addr("alice"), &addr("bob"), "", "hey", Utc::now());
        let conv = table.get(&ConversationId::from_seq(1)).unwrap();
        assert_eq!(conv.last_msg, "hey");
        assert!(table.get(&ConversationId::from_seq(99)).is_none());
    }

    #[test]
    fn retention_serde_names() {
        let json = serde_json::to_string(&ConversationRetention::DropWhenOffline).unwrap();
        assert_eq!(json, "\"drop_when_offline\"");
        let parsed: ConversationRetention = serde_json::from_str("\"retain\"").unwrap();
        assert_eq!(parsed, ConversationRetention::Retain);
        assert_eq!(ConversationRetention::default(), ConversationRetention::DropOnDisconnect);
    }

    #[test]
    fn wire_field_names() {
        let mut table = ConversationTable::new();
        let conv = table.record_message(&addr("alice"), &addr("bob"), "text", "hi", Utc::now());
        let value = serde_json::to_value(conv).unwrap();
        for field in ["id", "address1", "address2", "content_type", "last_msg", "updated"] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
    }
}
