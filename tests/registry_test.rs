use std::sync::Arc;

use webhook_fanout::{
    Dispatcher, DispatcherConfig, Endpoint, FailureReason, FileStore, InMemoryStore,
    RegistryError, Store, TopicMap, TopicRegistry, WebhookResponse,
};

fn ep(url: &str) -> Endpoint {
    Endpoint::parse(url).unwrap()
}

#[test]
fn test_add_all_with_duplicates() {
    let registry = TopicRegistry::new();
    registry.add_all("t", vec![ep("http://a"), ep("http://a"), ep("http://b")]);

    let set = registry.get("t").unwrap();
    assert_eq!(set.len(), 2);
    assert_eq!(set.as_slice(), &[ep("http://a"), ep("http://b")]);
}

#[test]
fn test_any_add_sequence_keeps_endpoints_unique() {
    let registry = TopicRegistry::new();
    let urls = ["http://a", "http://b", "http://A", "http://c:80", "http://b/", "http://c"];

    for (i, url) in urls.iter().enumerate() {
        if i % 2 == 0 {
            registry.add("t", ep(url));
        } else {
            registry.add_all("t", vec![ep(url), ep(urls[i - 1])]);
        }
    }

    let set = registry.get("t").unwrap();
    let mut unique = set.to_vec();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), set.len());
    assert_eq!(set.as_slice(), &[ep("http://a"), ep("http://b"), ep("http://c")]);
}

#[test]
fn test_endpoint_removal_vs_topic_removal_contract() {
    let registry = TopicRegistry::new();

    assert_eq!(
        registry.remove_endpoint("ghost", &ep("http://a")),
        Err(RegistryError::UnknownTopic("ghost".to_string()))
    );
    assert!(!registry.remove_topic("ghost"));
    assert_eq!(registry.remove_all_topics(vec!["ghost", "phantom"]), 0);
}

#[tokio::test]
async fn test_file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("webhooks.json");

    let registry = TopicRegistry::open(Arc::new(FileStore::new(&path))).await.unwrap();
    assert!(registry.is_empty());

    registry.add("test1", ep("http://a"));
    registry.add_all("test2", vec![ep("http://b"), ep("http://c")]);
    registry.persist().await.unwrap();

    let reopened = TopicRegistry::open(Arc::new(FileStore::new(&path))).await.unwrap();
    assert_eq!(reopened.get("test1"), registry.get("test1"));
    assert_eq!(reopened.get("test2"), registry.get("test2"));
    assert_eq!(reopened.topics(), vec!["test1".to_string(), "test2".to_string()]);
}

#[tokio::test]
async fn test_file_layout_is_plain_json_object() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("webhooks.json");

    let registry = TopicRegistry::open(Arc::new(FileStore::new(&path))).await.unwrap();
    registry.add_all("orders", vec![ep("http://a"), ep("https://b.example/hook")]);
    registry.persist().await.unwrap();

    let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(
        raw,
        serde_json::json!({ "orders": ["http://a/", "https://b.example/hook"] })
    );
}

#[tokio::test]
async fn test_registry_loaded_from_store_drives_dispatch() {
    let mut topics = TopicMap::new();
    topics.insert("orders".to_string(), vec![ep("http://a"), ep("http://b")]);
    let store = Arc::new(InMemoryStore::new());
    store.persist(&topics).await.unwrap();

    let registry = Arc::new(TopicRegistry::open(store).await.unwrap());
    let dispatcher = Dispatcher::new(registry, DispatcherConfig::default());

    let records = dispatcher
        .trigger_collect("orders", |_e: Endpoint| async move {
            Ok::<_, FailureReason>(WebhookResponse::new(200))
        })
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
}
