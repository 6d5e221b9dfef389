use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use webhook_fanout::{
    Dispatcher, DispatcherConfig, Endpoint, FileStore, HttpPoster, ResponseRecord, TopicRegistry,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let store = Arc::new(FileStore::new("webhooks.json"));
    let registry = Arc::new(TopicRegistry::open(store).await?);

    registry.add_all(
        "orders",
        vec![
            Endpoint::parse("https://example.com/webhook")?,
            Endpoint::parse("https://example.org/hooks/orders")?,
        ],
    );
    registry.persist().await?;

    let dispatcher = Dispatcher::new(registry, DispatcherConfig::default());
    let mut responses = dispatcher.subscribe();

    let poster = HttpPoster::new().with_timeout(Duration::from_secs(5));
    let post = poster.post(
        r#"{"id":123}"#,
        vec![("Content-Type".to_string(), vec!["application/json".to_string()])],
    );

    // Read records while the trigger runs so a full buffer never stalls it.
    let mut handle = dispatcher.trigger("orders", post)?;
    let summary = loop {
        tokio::select! {
            summary = &mut handle => break summary?,
            Some(record) = responses.recv() => report(&record),
        }
    };
    while let Some(record) = responses.try_recv() {
        report(&record);
    }

    println!(
        "trigger {} on {:?}: {} delivered, {} failed",
        summary.trigger_id, summary.topic, summary.delivered, summary.failed
    );

    dispatcher.close().await;
    Ok(())
}

fn report(record: &ResponseRecord) {
    match &record.outcome {
        Ok(response) => println!("{} -> {}", record.endpoint, response.status),
        Err(reason) => println!("{} failed: {}", record.endpoint, reason),
    }
}
