use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use webhook_fanout::{
    DispatchError, DispatchMode, Dispatcher, DispatcherConfig, Endpoint, FailureReason,
    TopicRegistry, WebhookResponse,
};

fn ep(url: &str) -> Endpoint {
    Endpoint::parse(url).unwrap()
}

fn echo(endpoint: Endpoint) -> impl std::future::Future<Output = Result<WebhookResponse, FailureReason>> {
    async move { Ok(WebhookResponse::new(200).with_body(endpoint.to_string())) }
}

#[tokio::test]
async fn test_orders_scenario() {
    let registry = Arc::new(TopicRegistry::new());
    registry.add_all("orders", vec![ep("http://a"), ep("http://b")]);
    let dispatcher = Dispatcher::new(registry.clone(), DispatcherConfig::default());

    let records = dispatcher.trigger_collect("orders", echo).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.topic == "orders" && r.is_success()));
    let mut contacted: Vec<Endpoint> = records.iter().map(|r| r.endpoint.clone()).collect();
    contacted.sort();
    assert_eq!(contacted, vec![ep("http://a"), ep("http://b")]);

    registry.remove_endpoint("orders", &ep("http://a")).unwrap();

    let records = dispatcher.trigger_collect("orders", echo).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].endpoint, ep("http://b"));
    assert_eq!(records[0].response().unwrap().body_text(), "http://b/");

    dispatcher.close().await;
}

#[tokio::test]
async fn test_subscriber_sees_one_record_per_endpoint() {
    let registry = Arc::new(TopicRegistry::new());
    registry.add_all("t", (0..5).map(|i| ep(&format!("http://host{}", i))));
    let dispatcher = Dispatcher::new(registry, DispatcherConfig::default());

    let mut first = dispatcher.subscribe();
    let mut second = dispatcher.subscribe();
    let summary = dispatcher.trigger("t", echo).unwrap().await.unwrap();
    assert_eq!(summary.delivered, 5);
    assert!(summary.is_complete());

    for sub in [&mut first, &mut second] {
        let mut seen = Vec::new();
        for _ in 0..5 {
            let record = sub.recv().await.unwrap();
            assert_eq!(record.trigger_id, summary.trigger_id);
            seen.push(record.endpoint);
        }
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 5);
        assert!(sub.try_recv().is_none());
    }
}

#[tokio::test]
async fn test_snapshot_isolation() {
    let registry = Arc::new(TopicRegistry::new());
    registry.add_all("t", vec![ep("http://a"), ep("http://b")]);
    let dispatcher = Dispatcher::new(registry.clone(), DispatcherConfig::default());

    let gate = Arc::new(Semaphore::new(0));
    let contacted = Arc::new(Mutex::new(Vec::new()));
    let request = {
        let gate = gate.clone();
        let contacted = contacted.clone();
        move |endpoint: Endpoint| {
            let gate = gate.clone();
            let contacted = contacted.clone();
            async move {
                gate.acquire().await.unwrap().forget();
                contacted.lock().unwrap().push(endpoint);
                Ok::<_, FailureReason>(WebhookResponse::new(200))
            }
        }
    };

    let handle = dispatcher.trigger("t", request).unwrap();

    registry.remove_endpoint("t", &ep("http://a")).unwrap();
    registry.add("t", ep("http://c"));
    gate.add_permits(10);

    let summary = handle.await.unwrap();
    assert_eq!(summary.delivered, 2);

    let mut contacted = contacted.lock().unwrap().clone();
    contacted.sort();
    assert_eq!(contacted, vec![ep("http://a"), ep("http://b")]);
    assert_eq!(
        registry.get("t").unwrap().as_slice(),
        &[ep("http://b"), ep("http://c")]
    );
}

#[tokio::test]
async fn test_failures_are_isolated_and_published() {
    let registry = Arc::new(TopicRegistry::new());
    registry.add_all("t", vec![ep("http://bad"), ep("http://good")]);
    let dispatcher = Dispatcher::new(registry, DispatcherConfig::default());

    let request = |endpoint: Endpoint| async move {
        if endpoint == ep("http://bad") {
            Err(FailureReason::RemoteError(500))
        } else {
            Ok(WebhookResponse::new(204))
        }
    };

    let records = dispatcher.trigger_collect("t", request).await.unwrap();
    assert_eq!(records.len(), 2);

    let bad = records.iter().find(|r| r.endpoint == ep("http://bad")).unwrap();
    assert_eq!(bad.failure(), Some(&FailureReason::RemoteError(500)));
    let good = records.iter().find(|r| r.endpoint == ep("http://good")).unwrap();
    assert_eq!(good.response().unwrap().status, 204);
}

#[tokio::test]
async fn test_panicking_request_does_not_affect_siblings() {
    let registry = Arc::new(TopicRegistry::new());
    registry.add_all("t", vec![ep("http://boom"), ep("http://fine")]);
    let dispatcher = Dispatcher::new(registry, DispatcherConfig::default());

    let request = |endpoint: Endpoint| async move {
        if endpoint == ep("http://boom") {
            panic!("request exploded");
        }
        Ok::<_, FailureReason>(WebhookResponse::new(200))
    };

    let mut sub = dispatcher.subscribe();
    let summary = dispatcher.trigger("t", request).unwrap().await.unwrap();
    assert_eq!(summary.panicked, 1);
    assert_eq!(summary.delivered, 1);

    let record = sub.recv().await.unwrap();
    assert_eq!(record.endpoint, ep("http://fine"));
    assert!(sub.try_recv().is_none());
}

#[tokio::test]
async fn test_concurrent_results_arrive_in_completion_order() {
    let registry = Arc::new(TopicRegistry::new());
    registry.add_all("t", vec![ep("http://slow"), ep("http://fast")]);
    let dispatcher = Dispatcher::new(registry, DispatcherConfig::default());

    let request = |endpoint: Endpoint| async move {
        if endpoint == ep("http://slow") {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok::<_, FailureReason>(WebhookResponse::new(200))
    };

    let records = dispatcher.trigger_collect("t", request).await.unwrap();
    let order: Vec<Endpoint> = records.into_iter().map(|r| r.endpoint).collect();
    assert_eq!(order, vec![ep("http://fast"), ep("http://slow")]);
}

#[tokio::test]
async fn test_sequential_mode_keeps_registration_order() {
    let registry = Arc::new(TopicRegistry::new());
    registry.add_all("t", vec![ep("http://slow"), ep("http://fast"), ep("http://last")]);
    let dispatcher = Dispatcher::new(
        registry,
        DispatcherConfig::default().with_mode(DispatchMode::Sequential),
    );

    let request = |endpoint: Endpoint| async move {
        if endpoint == ep("http://slow") {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Ok::<_, FailureReason>(WebhookResponse::new(200))
    };

    let records = dispatcher.trigger_collect("t", request).await.unwrap();
    let order: Vec<Endpoint> = records.into_iter().map(|r| r.endpoint).collect();
    assert_eq!(order, vec![ep("http://slow"), ep("http://fast"), ep("http://last")]);
}

#[tokio::test]
async fn test_close_cancels_in_flight_triggers() {
    let registry = Arc::new(TopicRegistry::new());
    registry.add_all("t", vec![ep("http://a"), ep("http://b")]);
    let dispatcher = Dispatcher::new(registry, DispatcherConfig::default());

    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let request = move |_endpoint: Endpoint| {
        let started_tx = started_tx.clone();
        async move {
            let _ = started_tx.send(());
            std::future::pending::<()>().await;
            Ok::<_, FailureReason>(WebhookResponse::new(200))
        }
    };

    let mut sub = dispatcher.subscribe();
    let handle = dispatcher.trigger("t", request).unwrap();
    started_rx.recv().await.unwrap();
    started_rx.recv().await.unwrap();

    dispatcher.close().await;
    assert!(!dispatcher.is_running());
    assert_eq!(dispatcher.in_flight(), 0);

    let summary = handle.await.unwrap();
    assert_eq!(summary.cancelled, 2);
    assert_eq!(summary.published(), 0);

    // The stream ends without ever carrying a record for the cancelled trigger.
    assert!(sub.recv().await.is_none());

    // Closing again is harmless, and new triggers are refused.
    dispatcher.close().await;
    assert!(matches!(
        dispatcher.trigger("t", echo),
        Err(DispatchError::EngineClosed)
    ));
}

#[tokio::test]
async fn test_close_without_work_is_idempotent() {
    let dispatcher = Dispatcher::new(Arc::new(TopicRegistry::new()), DispatcherConfig::default());
    dispatcher.close().await;
    dispatcher.close().await;
    assert!(dispatcher.subscribe().recv().await.is_none());
}

#[tokio::test]
async fn test_triggers_do_not_block_each_other() {
    let registry = Arc::new(TopicRegistry::new());
    registry.add("stuck", ep("http://stuck"));
    registry.add("free", ep("http://free"));
    let dispatcher = Dispatcher::new(registry, DispatcherConfig::default());

    let stuck = dispatcher
        .trigger("stuck", |_e: Endpoint| async move {
            std::future::pending::<()>().await;
            Ok::<_, FailureReason>(WebhookResponse::new(200))
        })
        .unwrap();

    let free = tokio::time::timeout(
        Duration::from_secs(5),
        dispatcher.trigger_collect("free", echo),
    )
    .await
    .expect("free topic should not wait for the stuck one")
    .unwrap();
    assert_eq!(free.len(), 1);
    assert!(!stuck.is_finished());

    dispatcher.close().await;
    assert_eq!(stuck.await.unwrap().cancelled, 1);
}

#[tokio::test]
async fn test_cancelled_publish_reaches_no_subscriber() {
    let registry = Arc::new(TopicRegistry::new());
    registry.add("t", ep("http://a"));
    let dispatcher = Dispatcher::new(
        registry,
        DispatcherConfig::default().with_stream_capacity(1),
    );

    let mut reader = dispatcher.subscribe();
    let mut laggard = dispatcher.subscribe();

    // Fill the laggard's only slot and keep the reader empty.
    let first = dispatcher.trigger("t", echo).unwrap().await.unwrap();
    assert_eq!(first.published(), 1);
    assert_eq!(reader.recv().await.unwrap().trigger_id, first.trigger_id);

    let handle = dispatcher.trigger("t", echo).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());
    handle.cancel();

    let summary = handle.await.unwrap();
    assert_eq!(summary.cancelled, 1);
    assert_eq!(summary.published(), 0);
    assert!(reader.try_recv().is_none());

    assert_eq!(laggard.recv().await.unwrap().trigger_id, first.trigger_id);
    assert!(laggard.try_recv().is_none());
}

#[tokio::test]
async fn test_close_cancels_publish_blocked_on_full_subscriber() {
    let registry = Arc::new(TopicRegistry::new());
    registry.add_all("t", vec![ep("http://a"), ep("http://b")]);
    let dispatcher = Dispatcher::new(
        registry,
        DispatcherConfig::default().with_stream_capacity(1),
    );

    let mut idle = dispatcher.subscribe();
    let handle = dispatcher.trigger("t", echo).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());

    tokio::time::timeout(Duration::from_secs(5), dispatcher.close())
        .await
        .expect("close should not wait on a blocked publisher");

    let summary = handle.await.unwrap();
    assert_eq!(summary.published(), 1);
    assert_eq!(summary.cancelled, 1);

    assert!(idle.recv().await.is_some());
    assert!(idle.recv().await.is_none());
}
