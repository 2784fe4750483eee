//! Memory records and the keys that scope them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Id, Timestamp, new_id, now};

/// Opaque collaborator-supplied tags attached to a record.
///
/// The engine persists and optionally filters on these (e.g. emotion labels
/// produced upstream) but never interprets their semantics.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// What kind of memory a record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// A conversational turn.
    Conversation,
    /// An extracted fact.
    Fact,
    /// A condensed summary of prior turns.
    Summary,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Conversation => "conversation",
            MemoryKind::Fact => "fact",
            MemoryKind::Summary => "summary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "conversation" => Some(MemoryKind::Conversation),
            "fact" => Some(MemoryKind::Fact),
            "summary" => Some(MemoryKind::Summary),
            _ => None,
        }
    }
}

/// The atomic unit of storage.
///
/// Immutable once durably written; writes are idempotent by `id`. The
/// `sequence` counter is strictly increasing per `(user_id, namespace)` and
/// breaks timestamp ties, so chronological order is exactly
/// `(timestamp, sequence)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Id,
    pub user_id: String,
    /// Bot namespace: one bot persona's memory space.
    pub namespace: String,
    pub channel_id: String,
    pub role: Role,
    pub content: String,
    /// Fixed-length vector produced by the external embedding provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub timestamp: Timestamp,
    pub sequence: u64,
    pub kind: MemoryKind,
    #[serde(skip_serializing_if = "Metadata::is_empty", default)]
    pub metadata: Metadata,
}

impl MemoryRecord {
    /// Create a conversational turn record. The sequence is stamped later,
    /// when the record is handed to the engine's `store()`.
    pub fn turn(
        user_id: impl Into<String>,
        namespace: impl Into<String>,
        channel_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            user_id: user_id.into(),
            namespace: namespace.into(),
            channel_id: channel_id.into(),
            role,
            content: content.into(),
            embedding: None,
            timestamp: now(),
            sequence: 0,
            kind: MemoryKind::Conversation,
            metadata: Metadata::new(),
        }
    }

    /// Attach an externally-produced embedding.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Override the record kind.
    pub fn with_kind(mut self, kind: MemoryKind) -> Self {
        self.kind = kind;
        self
    }

    /// Attach a metadata tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Override the timestamp (tests and backfill).
    pub fn at(mut self, ts: Timestamp) -> Self {
        self.timestamp = ts;
        self
    }

    /// The owner key this record belongs to.
    pub fn owner(&self) -> OwnerKey {
        OwnerKey::new(&self.user_id, &self.namespace)
    }

    /// The channel key this record belongs to.
    pub fn channel(&self) -> ChannelKey {
        ChannelKey::new(&self.user_id, &self.namespace, &self.channel_id)
    }
}

/// Scopes session state and sequence counters: one user within one bot
/// namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerKey {
    pub user_id: String,
    pub namespace: String,
}

impl OwnerKey {
    pub fn new(user_id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\u{1f}{}", self.user_id, self.namespace)
    }
}

/// Scopes cache entries: an owner key plus the channel the turns arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    pub user_id: String,
    pub namespace: String,
    pub channel_id: String,
}

impl ChannelKey {
    pub fn new(
        user_id: impl Into<String>,
        namespace: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            namespace: namespace.into(),
            channel_id: channel_id.into(),
        }
    }

    pub fn owner(&self) -> OwnerKey {
        OwnerKey::new(&self.user_id, &self.namespace)
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\u{1f}{}\u{1f}{}",
            self.user_id, self.namespace, self.channel_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_builder() {
        let record = MemoryRecord::turn("u1", "bot", "chan", Role::User, "hello")
            .with_embedding(vec![0.1, 0.2])
            .with_tag("emotion", "joy");

        assert_eq!(record.role, Role::User);
        assert_eq!(record.kind, MemoryKind::Conversation);
        assert_eq!(record.embedding.as_deref(), Some(&[0.1f32, 0.2][..]));
        assert_eq!(
            record.metadata.get("emotion"),
            Some(&serde_json::json!("joy"))
        );
    }

    #[test]
    fn test_keys_distinguish_owners() {
        let a = ChannelKey::new("alice", "bot", "general");
        let b = ChannelKey::new("bob", "bot", "general");
        assert_ne!(a.to_string(), b.to_string());
        assert_ne!(a.owner(), b.owner());
    }

    #[test]
    fn test_keys_distinguish_channels() {
        let a = ChannelKey::new("alice", "bot", "general");
        let b = ChannelKey::new("alice", "bot", "dm");
        assert_ne!(a.to_string(), b.to_string());
        assert_eq!(a.owner(), b.owner());
    }

    #[test]
    fn test_role_round_trip() {
        for role in [Role::User, Role::Assistant] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("system"), None);
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            MemoryKind::Conversation,
            MemoryKind::Fact,
            MemoryKind::Summary,
        ] {
            assert_eq!(MemoryKind::parse(kind.as_str()), Some(kind));
        }
    }
}
