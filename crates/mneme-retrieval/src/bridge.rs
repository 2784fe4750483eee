//! Wires the cache's durable hook to the real backends.

use std::sync::Arc;

use async_trait::async_trait;

use mneme_memory::{ChronicleBackend, Order, RangeQuery, SemanticBackend};
use mneme_session::{DurableHook, Error as SessionError};
use mneme_types::{ChannelKey, MemoryRecord};

/// Connects the hybrid cache to the chronological log and semantic index.
pub struct DurableBridge {
    chronicle: Arc<dyn ChronicleBackend>,
    semantic: Arc<dyn SemanticBackend>,
}

impl DurableBridge {
    pub fn new(chronicle: Arc<dyn ChronicleBackend>, semantic: Arc<dyn SemanticBackend>) -> Self {
        Self {
            chronicle,
            semantic,
        }
    }
}

#[async_trait]
impl DurableHook for DurableBridge {
    async fn bootstrap(
        &self,
        channel: &ChannelKey,
        limit: usize,
    ) -> mneme_session::Result<Vec<MemoryRecord>> {
        let query = RangeQuery::new(channel.owner())
            .in_channel(channel.channel_id.clone())
            .order(Order::Desc)
            .limit(limit);

        self.chronicle
            .range(&query)
            .await
            .map_err(|e| SessionError::Durable(e.to_string()))
    }

    async fn persist(&self, record: &MemoryRecord) -> mneme_session::Result<()> {
        self.chronicle
            .append(record)
            .await
            .map_err(|e| SessionError::Durable(e.to_string()))?;

        // Records without embeddings are durable in the log only; the index
        // has nothing to rank them by.
        if record.embedding.is_some() {
            self.semantic
                .upsert(record)
                .await
                .map_err(|e| SessionError::Durable(e.to_string()))?;
        }

        Ok(())
    }
}
