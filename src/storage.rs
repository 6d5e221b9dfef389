use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::PersistenceError;
use crate::types::TopicMap;

/// Durable backing for a topic registry.
///
/// `load` is called once when a registry is opened. `persist` is called
/// only when the owning process asks the registry to persist; the registry
/// never writes on its own.
#[async_trait]
pub trait Store: Send + Sync {
    async fn load(&self) -> Result<TopicMap, PersistenceError>;
    async fn persist(&self, topics: &TopicMap) -> Result<(), PersistenceError>;
}

/// In-memory store that keeps the last persisted map.
#[derive(Default)]
pub struct InMemoryStore {
    topics: Mutex<TopicMap>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `topics`.
    pub fn with_topics(topics: TopicMap) -> Self {
        Self {
            topics: Mutex::new(topics),
        }
    }

    /// Copy of what was last persisted.
    pub async fn snapshot(&self) -> TopicMap {
        self.topics.lock().await.clone()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn load(&self) -> Result<TopicMap, PersistenceError> {
        Ok(self.topics.lock().await.clone())
    }

    async fn persist(&self, topics: &TopicMap) -> Result<(), PersistenceError> {
        *self.topics.lock().await = topics.clone();
        Ok(())
    }
}
