//! Topic registry
//!
//! Maps topic names to their [`EndpointSet`]. Topics live in a sharded
//! concurrent map, so work on one topic never waits behind a lock held for
//! an unrelated topic, and no lock is ever held across an `.await`.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{PersistenceError, RegistryError};
use crate::storage::Store;
use crate::types::{Endpoint, EndpointSet, TopicMap};

/// Topic → endpoint membership.
///
/// Every mutation is synchronous and visible to the next call as soon as
/// it returns. Sets handed out by [`get`](Self::get) are immutable
/// snapshots.
#[derive(Default)]
pub struct TopicRegistry {
    topics: DashMap<String, EndpointSet>,
    store: Option<Arc<dyn Store>>,
}

impl TopicRegistry {
    /// Create a purely in-memory registry; [`persist`](Self::persist) is a no-op.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry backed by `store`, hydrated from `store.load()`.
    ///
    /// Stored duplicates are collapsed using [`add_all`](Self::add_all)
    /// semantics.
    pub async fn open(store: Arc<dyn Store>) -> Result<Self, PersistenceError> {
        let loaded = store.load().await?;

        let registry = Self {
            topics: DashMap::new(),
            store: Some(store),
        };
        for (topic, endpoints) in loaded {
            registry.add_all(&topic, endpoints);
        }

        tracing::info!(topics = registry.topic_count(), "Topic registry loaded");
        Ok(registry)
    }

    /// Write the current state to the backing store, if there is one.
    pub async fn persist(&self) -> Result<(), PersistenceError> {
        let Some(store) = self.store.as_ref() else {
            return Ok(());
        };
        let topics = self.to_topic_map();
        store.persist(&topics).await?;

        tracing::debug!(topics = topics.len(), "Topic registry persisted");
        Ok(())
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Register `endpoint` under `topic`, creating the topic if needed.
    ///
    /// Returns `false` if the endpoint was already registered.
    pub fn add(&self, topic: &str, endpoint: Endpoint) -> bool {
        let mut set = self.topics.entry(topic.to_string()).or_default();
        let added = set.insert(endpoint.clone());
        if added {
            tracing::debug!(topic = topic, endpoint = %endpoint, "Endpoint added");
        }
        added
    }

    /// Register each endpoint in order, skipping ones already present.
    ///
    /// The topic is created even if `endpoints` is empty. Returns how many
    /// endpoints were newly added.
    pub fn add_all<I>(&self, topic: &str, endpoints: I) -> usize
    where
        I: IntoIterator<Item = Endpoint>,
    {
        let mut set = self.topics.entry(topic.to_string()).or_default();
        let added = endpoints
            .into_iter()
            .filter(|endpoint| set.insert(endpoint.clone()))
            .count();
        tracing::debug!(topic = topic, added = added, total = set.len(), "Endpoints added");
        added
    }

    /// Remove `endpoint` from `topic`.
    ///
    /// The topic stays registered even if this empties it.
    pub fn remove_endpoint(&self, topic: &str, endpoint: &Endpoint) -> Result<bool, RegistryError> {
        let mut set = self
            .topics
            .get_mut(topic)
            .ok_or_else(|| RegistryError::UnknownTopic(topic.to_string()))?;
        let removed = set.remove(endpoint);
        if removed {
            tracing::debug!(topic = topic, endpoint = %endpoint, "Endpoint removed");
        }
        Ok(removed)
    }

    /// Remove every listed endpoint that is registered under `topic`.
    ///
    /// Returns how many were actually removed.
    pub fn remove_all_endpoints<'a, I>(&self, topic: &str, endpoints: I) -> Result<usize, RegistryError>
    where
        I: IntoIterator<Item = &'a Endpoint>,
    {
        let mut set = self
            .topics
            .get_mut(topic)
            .ok_or_else(|| RegistryError::UnknownTopic(topic.to_string()))?;
        let removed = endpoints
            .into_iter()
            .filter(|endpoint| set.remove(endpoint))
            .count();
        tracing::debug!(topic = topic, removed = removed, total = set.len(), "Endpoints removed");
        Ok(removed)
    }

    /// Delete a topic and its endpoints. Unknown topics are ignored.
    pub fn remove_topic(&self, topic: &str) -> bool {
        let removed = self.topics.remove(topic).is_some();
        if removed {
            tracing::debug!(topic = topic, "Topic removed");
        }
        removed
    }

    /// Delete every listed topic. Returns how many existed.
    pub fn remove_all_topics<I, S>(&self, topics: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        topics
            .into_iter()
            .filter(|topic| self.remove_topic(topic.as_ref()))
            .count()
    }

    /// Current endpoints of `topic`.
    pub fn get(&self, topic: &str) -> Result<EndpointSet, RegistryError> {
        self.topics
            .get(topic)
            .map(|set| set.clone())
            .ok_or_else(|| RegistryError::UnknownTopic(topic.to_string()))
    }

    /// Every topic with its endpoints, ordered by topic name.
    pub fn get_all(&self) -> BTreeMap<String, EndpointSet> {
        self.topics
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn contains_topic(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Registered topic names, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Serializable copy of the whole registry.
    pub fn to_topic_map(&self) -> TopicMap {
        self.topics
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().to_vec()))
            .collect()
    }
}
