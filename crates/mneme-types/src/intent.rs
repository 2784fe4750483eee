//! Classified query intents.

use serde::{Deserialize, Serialize};

/// How a query should be answered.
///
/// Temporal intents depend on chronological order and are answered from the
/// chronological log only; semantic intents depend on topical similarity and
/// are answered from the semantic index blended with recent turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    /// Default: topical relevance.
    Semantic,
    /// "What was the first thing I said?"
    TemporalFirst,
    /// "What did I say last time?"
    TemporalLast,
    /// "When did I mention ...?"
    TemporalWhen,
    /// "What have we talked about this session?"
    SessionScoped,
}

impl IntentKind {
    /// Whether this intent must be answered from chronological order alone.
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            IntentKind::TemporalFirst | IntentKind::TemporalLast | IntentKind::TemporalWhen
        )
    }
}

/// The window a temporal or session-scoped query ranges over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryScope {
    /// The active session window (inactivity-gap bounded).
    #[default]
    Session,
    /// The current calendar day (UTC boundary).
    CalendarDay,
    /// No lower bound.
    AllTime,
}

/// A classified utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryIntent {
    pub kind: IntentKind,
    pub scope: QueryScope,
    /// True for relative phrasings such as "3 messages ago".
    pub relative: bool,
    /// Message offset for relative phrasings (1 = the previous message).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

impl QueryIntent {
    pub fn semantic() -> Self {
        Self {
            kind: IntentKind::Semantic,
            scope: QueryScope::AllTime,
            relative: false,
            offset: None,
        }
    }

    pub fn new(kind: IntentKind, scope: QueryScope) -> Self {
        Self {
            kind,
            scope,
            relative: false,
            offset: None,
        }
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.relative = true;
        self.offset = Some(offset);
        self
    }
}
