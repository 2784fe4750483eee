//! End-to-end tests over the real SQLite backends.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use mneme_memory::{ChronicleBackend, ChronicleStore, SemanticBackend, SemanticIndex};
use mneme_retrieval::{ContextRequest, EngineConfig, RetrievalOrchestrator};
use mneme_session::RetryPolicy;
use mneme_types::{MemoryRecord, Role};

const DIMS: usize = 4;

fn sqlite_engine() -> RetrievalOrchestrator {
    let chronicle = Arc::new(ChronicleStore::open_in_memory().unwrap());
    let semantic = Arc::new(SemanticIndex::open_in_memory(DIMS).unwrap());
    RetrievalOrchestrator::new(
        EngineConfig::new().with_retry(RetryPolicy::new(0, Duration::from_millis(1))),
        chronicle as Arc<dyn ChronicleBackend>,
        semantic as Arc<dyn SemanticBackend>,
    )
}

fn turn(content: &str) -> MemoryRecord {
    MemoryRecord::turn("alice", "muse", "general", Role::User, content)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn sqlite_round_trip_temporal_and_semantic() {
    let engine = sqlite_engine();
    let now = mneme_types::now();

    engine
        .store(turn("Hi").at(now - ChronoDuration::minutes(3)))
        .await
        .unwrap();
    engine
        .store(
            turn("my dog is called Biscuit")
                .with_embedding(vec![1.0, 0.0, 0.0, 0.0])
                .at(now - ChronoDuration::minutes(2)),
        )
        .await
        .unwrap();
    engine
        .store(
            turn("I work night shifts")
                .with_embedding(vec![0.0, 1.0, 0.0, 0.0])
                .at(now - ChronoDuration::minutes(1)),
        )
        .await
        .unwrap();
    settle().await;

    let first = engine
        .assemble_context(&ContextRequest::new(
            "alice",
            "muse",
            "general",
            "what was the first thing I said?",
        ))
        .await
        .unwrap();
    assert_eq!(first.recent.len(), 1);
    assert_eq!(first.recent[0].content, "Hi");

    let about_dog = engine
        .assemble_context(
            &ContextRequest::new("alice", "muse", "general", "tell me about my pet")
                .with_embedding(vec![1.0, 0.0, 0.0, 0.0]),
        )
        .await
        .unwrap();
    assert!(about_dog.complete);
    assert!(!about_dog.semantic.is_empty());
    assert_eq!(
        about_dog.semantic[0].record.content,
        "my dog is called Biscuit"
    );
}

#[tokio::test]
async fn wrong_query_dimensions_degrade_semantic_branch() {
    let engine = sqlite_engine();

    engine
        .store(turn("hello").with_embedding(vec![1.0, 0.0, 0.0, 0.0]))
        .await
        .unwrap();
    settle().await;

    // A malformed query embedding degrades the semantic branch; the call
    // itself still succeeds with the recent turns.
    let bundle = engine
        .assemble_context(
            &ContextRequest::new("alice", "muse", "general", "anything?")
                .with_embedding(vec![1.0, 0.0]),
        )
        .await
        .unwrap();
    assert!(!bundle.complete);
    assert!(bundle.semantic.is_empty());
    assert!(!bundle.recent.is_empty());
}

#[tokio::test]
async fn restart_rebuilds_context_from_durable_log() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("chronicle.db");
    let index_path = dir.path().join("index.db");

    let config = || EngineConfig::new().with_retry(RetryPolicy::new(0, Duration::from_millis(1)));
    let now = mneme_types::now();

    // First process lifetime: a short conversation.
    {
        let engine = RetrievalOrchestrator::new(
            config(),
            Arc::new(ChronicleStore::open(&log_path).unwrap()) as Arc<dyn ChronicleBackend>,
            Arc::new(SemanticIndex::open(&index_path, DIMS).unwrap()) as Arc<dyn SemanticBackend>,
        );
        engine
            .store(turn("before the restart").at(now - ChronoDuration::minutes(2)))
            .await
            .unwrap();
        settle().await;
    }

    // Second process lifetime over the same files: nothing cached, so the
    // first read must bootstrap from the log rather than serve stale or
    // empty context.
    let engine = RetrievalOrchestrator::new(
        config(),
        Arc::new(ChronicleStore::open(&log_path).unwrap()) as Arc<dyn ChronicleBackend>,
        Arc::new(SemanticIndex::open(&index_path, DIMS).unwrap()) as Arc<dyn SemanticBackend>,
    );

    let bundle = engine
        .assemble_context(&ContextRequest::new("alice", "muse", "general", "hello again"))
        .await
        .unwrap();
    assert_eq!(bundle.recent.len(), 1);
    assert_eq!(bundle.recent[0].content, "before the restart");

    // Sequences continue past the restart instead of colliding.
    let seq = engine.store(turn("after the restart")).await.unwrap();
    assert!(seq > bundle.recent[0].sequence);
}
