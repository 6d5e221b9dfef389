//! A topic-based webhook registry and dispatcher.
//!
//! Callers register endpoints under named **topics** in a
//! [`TopicRegistry`], then ask a [`Dispatcher`] to trigger a topic: every
//! endpoint registered at that instant receives one request, concurrently,
//! and every result is published on a live response stream.
//!
//! ## Guarantees
//! - One attempt per registered endpoint per trigger call
//! - Snapshot isolation: registry changes never affect an in-flight trigger
//! - Per-endpoint failure isolation
//! - Bounded buffering with explicit backpressure
//! - Instance-scoped cancellation via [`Dispatcher::close`]
//!
//! ## Non-Guarantees
//! - Retries or dead-lettering
//! - Ordering of results across endpoints
//! - Request signing or rate limiting
//! - Automatic persistence (call [`TopicRegistry::persist`])
//!
//! ```no_run
//! use std::sync::Arc;
//! use webhook_fanout::{Dispatcher, DispatcherConfig, Endpoint, HttpPoster, TopicRegistry};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(TopicRegistry::new());
//! registry.add("orders", Endpoint::parse("https://example.com/hook")?);
//!
//! let dispatcher = Dispatcher::new(registry, DispatcherConfig::default());
//!
//! let post = HttpPoster::new().post(r#"{"id":123}"#, Vec::new());
//! for record in dispatcher.trigger_collect("orders", post).await? {
//!     println!("{} -> {:?}", record.endpoint, record.outcome);
//! }
//! dispatcher.close().await;
//! # Ok(())
//! # }
//! ```

mod dispatcher;
mod worker;
mod types;
mod error;
mod registry;
mod request;
mod storage;
mod storage_file;
mod stream;

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "redis")]
mod storage_redis;

#[cfg(feature = "postgres")]
mod storage_postgres;

pub use dispatcher::{Dispatcher, DispatcherConfig, TriggerHandle};
pub use worker::TriggerSummary;
pub use types::{
    DispatchMode,
    Endpoint,
    EndpointSet,
    MissingTopicPolicy,
    OverflowPolicy,
    ResponseRecord,
    TopicMap,
    TriggerId,
    WebhookResponse,
};
pub use error::{
    DispatchError,
    EndpointError,
    FailureReason,
    PersistenceError,
    RegistryError,
};
pub use registry::TopicRegistry;
pub use request::RequestFn;
pub use storage::{Store, InMemoryStore};
pub use storage_file::FileStore;
pub use stream::{ResponseStream, ResponseSubscriber};

#[cfg(feature = "http")]
pub use http::{HttpPoster, PostRequest};

#[cfg(feature = "redis")]
pub use storage_redis::RedisStore;

#[cfg(feature = "postgres")]
pub use storage_postgres::PostgresStore;
