//! Deterministic query intent classification.
//!
//! Pattern-matches an utterance against a fixed taxonomy of temporal
//! phrasings. Intentionally explainable: given the same utterance it always
//! produces the same intent, and the pattern that fired is visible in the
//! tables below. A learned classifier can be layered on top later without
//! touching the orchestrator contract.
//!
//! Priority when multiple patterns match: `temporal_* > session_scoped >
//! semantic`.

use regex::Regex;

use mneme_types::{IntentKind, QueryIntent, QueryScope};

use crate::config::TemporalScopeMode;

/// Phrasings asking for the earliest turn.
const FIRST_PATTERNS: &[&str] = &[
    "the very first",
    "first thing i said",
    "first thing i told",
    "first thing you said",
    "first message",
    "what did i say first",
    "how did this conversation start",
    "what did i start with",
];

/// Phrasings asking for the latest turn.
const LAST_PATTERNS: &[&str] = &[
    "last thing i said",
    "last thing you said",
    "last message",
    "last time",
    "what did i just say",
    "previous message",
    "most recent thing",
];

/// Phrasings asking when something happened.
const WHEN_PATTERNS: &[&str] = &[
    "when did i",
    "when did we",
    "when did you",
    "how long ago",
    "what time did",
    "what day did",
];

/// Phrasings scoped to the current conversation.
const SESSION_PATTERNS: &[&str] = &[
    "this session",
    "this conversation",
    "since we started",
    "what have we talked about",
    "what have we discussed",
];

/// Cues pinning the query to the current calendar day.
const DAY_SCOPE_CUES: &[&str] = &[
    "today",
    "this morning",
    "this afternoon",
    "this evening",
    "earlier today",
];

/// Cues pinning the query to the session window.
const SESSION_SCOPE_CUES: &[&str] = &["this session", "this conversation", "since we started"];

fn contains_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(p))
}

/// Classifies utterances into query intents.
pub struct QueryIntentClassifier {
    default_scope: QueryScope,
    relative_re: Regex,
}

impl QueryIntentClassifier {
    /// Create a classifier with the configured default temporal scope.
    pub fn new(mode: TemporalScopeMode) -> Self {
        let default_scope = match mode {
            TemporalScopeMode::SessionWindow => QueryScope::Session,
            TemporalScopeMode::CalendarDay => QueryScope::CalendarDay,
        };
        Self {
            default_scope,
            relative_re: Regex::new(r"(\d+)\s+(?:messages?|turns?)\s+ago")
                .expect("valid relative-offset regex"),
        }
    }

    /// Classify an utterance.
    pub fn classify(&self, utterance: &str) -> QueryIntent {
        let lower = utterance.to_lowercase();

        // Explicit scope cues override the configured default. Session cues
        // win over day cues ("earlier today in this session" is rare but
        // session is the tighter window).
        let scope = if contains_any(&lower, SESSION_SCOPE_CUES) {
            Some(QueryScope::Session)
        } else if contains_any(&lower, DAY_SCOPE_CUES) {
            Some(QueryScope::CalendarDay)
        } else {
            None
        };

        // Relative offsets are temporal by construction.
        if let Some(caps) = self.relative_re.captures(&lower)
            && let Ok(offset) = caps[1].parse::<usize>()
            && offset > 0
        {
            return QueryIntent::new(
                IntentKind::TemporalLast,
                scope.unwrap_or(QueryScope::Session),
            )
            .with_offset(offset);
        }

        if contains_any(&lower, FIRST_PATTERNS) {
            return QueryIntent::new(IntentKind::TemporalFirst, scope.unwrap_or(self.default_scope));
        }
        if contains_any(&lower, LAST_PATTERNS) {
            return QueryIntent::new(IntentKind::TemporalLast, scope.unwrap_or(self.default_scope));
        }
        if contains_any(&lower, WHEN_PATTERNS) {
            // "When did I..." reaches beyond the current session unless the
            // utterance says otherwise.
            return QueryIntent::new(IntentKind::TemporalWhen, scope.unwrap_or(QueryScope::AllTime));
        }

        if contains_any(&lower, SESSION_PATTERNS) {
            return QueryIntent::new(IntentKind::SessionScoped, QueryScope::Session);
        }

        QueryIntent::semantic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> QueryIntentClassifier {
        QueryIntentClassifier::new(TemporalScopeMode::SessionWindow)
    }

    #[test]
    fn test_default_is_semantic() {
        let intent = classifier().classify("tell me about that trip to the mountains");
        assert_eq!(intent.kind, IntentKind::Semantic);
        assert_eq!(intent.scope, QueryScope::AllTime);
    }

    #[test]
    fn test_first_patterns() {
        for utterance in [
            "What was the first thing I said?",
            "do you remember the very first message",
            "How did this conversation start?",
        ] {
            let intent = classifier().classify(utterance);
            assert_eq!(intent.kind, IntentKind::TemporalFirst, "{utterance}");
        }
    }

    #[test]
    fn test_last_patterns() {
        let intent = classifier().classify("what did I just say?");
        assert_eq!(intent.kind, IntentKind::TemporalLast);
    }

    #[test]
    fn test_when_defaults_to_all_time() {
        let intent = classifier().classify("when did I mention the beach?");
        assert_eq!(intent.kind, IntentKind::TemporalWhen);
        assert_eq!(intent.scope, QueryScope::AllTime);
    }

    #[test]
    fn test_session_scoped() {
        let intent = classifier().classify("what have we talked about so far?");
        assert_eq!(intent.kind, IntentKind::SessionScoped);
        assert_eq!(intent.scope, QueryScope::Session);
    }

    #[test]
    fn test_temporal_beats_session_scoped() {
        // Matches both a first-pattern and a session cue: temporal wins,
        // with the session cue narrowing the scope.
        let intent = classifier().classify("what was the first thing I said this session?");
        assert_eq!(intent.kind, IntentKind::TemporalFirst);
        assert_eq!(intent.scope, QueryScope::Session);
    }

    #[test]
    fn test_day_scope_cue() {
        let intent = classifier().classify("what was the first thing I said today?");
        assert_eq!(intent.kind, IntentKind::TemporalFirst);
        assert_eq!(intent.scope, QueryScope::CalendarDay);
    }

    #[test]
    fn test_configured_default_scope() {
        let day = QueryIntentClassifier::new(TemporalScopeMode::CalendarDay);
        let intent = day.classify("what was the first thing I said?");
        assert_eq!(intent.scope, QueryScope::CalendarDay);

        let session = classifier().classify("what was the first thing I said?");
        assert_eq!(session.scope, QueryScope::Session);
    }

    #[test]
    fn test_relative_offset() {
        let intent = classifier().classify("what did I say 3 messages ago?");
        assert_eq!(intent.kind, IntentKind::TemporalLast);
        assert!(intent.relative);
        assert_eq!(intent.offset, Some(3));
    }

    #[test]
    fn test_deterministic() {
        let a = classifier().classify("when did we talk about dinner today?");
        let b = classifier().classify("when did we talk about dinner today?");
        assert_eq!(a, b);
    }
}
