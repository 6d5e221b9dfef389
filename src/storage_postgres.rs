use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_postgres::Client;

use crate::error::PersistenceError;
use crate::storage::Store;
use crate::types::{Endpoint, TopicMap};

/// Stores topics in the `webhook_topics` table, one row per topic.
pub struct PostgresStore {
    client: Mutex<Client>,
}

fn backend_error(err: tokio_postgres::Error) -> PersistenceError {
    PersistenceError::Backend(err.to_string())
}

impl PostgresStore {
    /// Wrap a connected client, creating the table if needed.
    pub async fn new(client: Client) -> Result<Self, PersistenceError> {
        client
            .execute(
                "CREATE TABLE IF NOT EXISTS webhook_topics (
                    topic TEXT PRIMARY KEY,
                    endpoints JSONB NOT NULL
                )",
                &[],
            )
            .await
            .map_err(backend_error)?;

        Ok(Self {
            client: Mutex::new(client),
        })
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn load(&self) -> Result<TopicMap, PersistenceError> {
        let client = self.client.lock().await;
        let rows = client
            .query("SELECT topic, endpoints FROM webhook_topics", &[])
            .await
            .map_err(backend_error)?;

        let mut topics = TopicMap::new();
        for row in rows {
            let topic: String = row.try_get(0).map_err(backend_error)?;
            let value: serde_json::Value = row.try_get(1).map_err(backend_error)?;
            let endpoints: Vec<Endpoint> = serde_json::from_value(value)?;
            topics.insert(topic, endpoints);
        }
        Ok(topics)
    }

    async fn persist(&self, topics: &TopicMap) -> Result<(), PersistenceError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(backend_error)?;

        tx.execute("DELETE FROM webhook_topics", &[])
            .await
            .map_err(backend_error)?;

        for (topic, endpoints) in topics {
            let value = serde_json::to_value(endpoints)?;
            tx.execute(
                "INSERT INTO webhook_topics (topic, endpoints) VALUES ($1, $2)",
                &[topic, &value],
            )
            .await
            .map_err(backend_error)?;
        }

        tx.commit().await.map_err(backend_error)?;

        tracing::debug!(topics = topics.len(), "Persisted topics to postgres");
        Ok(())
    }
}
