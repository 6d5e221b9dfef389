use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::error::PersistenceError;
use crate::storage::Store;
use crate::types::{Endpoint, TopicMap};

/// Stores topics in a Redis hash.
///
/// Key `<prefix>:topics`, one field per topic, each value a JSON array of
/// endpoint strings.
pub struct RedisStore {
    client: redis::Client,
    prefix: String,
}

impl RedisStore {
    pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    fn topics_key(&self) -> String {
        format!("{}:topics", self.prefix)
    }

    async fn connection(&self) -> Result<redis::aio::Connection, PersistenceError> {
        self.client
            .get_tokio_connection()
            .await
            .map_err(backend_error)
    }
}

fn backend_error(err: redis::RedisError) -> PersistenceError {
    PersistenceError::Backend(err.to_string())
}

#[async_trait]
impl Store for RedisStore {
    async fn load(&self) -> Result<TopicMap, PersistenceError> {
        let mut conn = self.connection().await?;
        let fields: HashMap<String, String> = conn
            .hgetall(self.topics_key())
            .await
            .map_err(backend_error)?;

        let mut topics = TopicMap::new();
        for (topic, value) in fields {
            let endpoints: Vec<Endpoint> = serde_json::from_str(&value)?;
            topics.insert(topic, endpoints);
        }
        Ok(topics)
    }

    async fn persist(&self, topics: &TopicMap) -> Result<(), PersistenceError> {
        let mut fields = Vec::with_capacity(topics.len());
        for (topic, endpoints) in topics {
            fields.push((topic.clone(), serde_json::to_string(endpoints)?));
        }

        let key = self.topics_key();
        let mut pipe = redis::pipe();
        pipe.atomic().del(&key).ignore();
        // HSET with no field/value pairs is a syntax error.
        if !fields.is_empty() {
            pipe.hset_multiple(&key, &fields).ignore();
        }

        let mut conn = self.connection().await?;
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(backend_error)?;

        tracing::debug!(key = %key, topics = topics.len(), "Persisted topics to redis");
        Ok(())
    }
}
