use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::DispatchError;
use crate::registry::TopicRegistry;
use crate::request::RequestFn;
use crate::stream::{ResponseStream, ResponseSubscriber};
use crate::types::{DispatchMode, EndpointSet, MissingTopicPolicy, OverflowPolicy, ResponseRecord, TriggerId};
use crate::worker::{collect, run_endpoint, run_sequential, TriggerContext, TriggerSummary};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Maximum number of requests in flight across all triggers.
    pub max_in_flight: usize,
    /// Records buffered per response stream subscriber.
    pub stream_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub missing_topic: MissingTopicPolicy,
    pub mode: DispatchMode,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 100,
            stream_capacity: 1_000,
            overflow_policy: OverflowPolicy::Block,
            missing_topic: MissingTopicPolicy::Fail,
            mode: DispatchMode::Concurrent,
        }
    }
}

impl DispatcherConfig {
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity;
        self
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    pub fn with_missing_topic(mut self, policy: MissingTopicPolicy) -> Self {
        self.missing_topic = policy;
        self
    }

    pub fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Fans requests out to the endpoints of a topic.
///
/// Each dispatcher owns its own cancellation scope: [`close`](Self::close)
/// affects only the triggers this instance started. Must be used from
/// within a Tokio runtime.
pub struct Dispatcher {
    registry: Arc<TopicRegistry>,
    stream: ResponseStream,
    in_flight: Arc<Semaphore>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    is_running: AtomicBool,
    next_trigger_id: AtomicU64,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(registry: Arc<TopicRegistry>, config: DispatcherConfig) -> Self {
        Self {
            registry,
            stream: ResponseStream::new(config.stream_capacity, config.overflow_policy),
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            is_running: AtomicBool::new(true),
            next_trigger_id: AtomicU64::new(1),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Number of live tasks (supervisors and endpoint tasks).
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Attach to the response stream. Only records published from now on
    /// are received.
    pub fn subscribe(&self) -> ResponseSubscriber {
        self.stream.subscribe()
    }

    /// Send `request` to every endpoint currently registered under `topic`.
    ///
    /// The endpoints are snapshotted now; later registry changes do not
    /// affect this call. Returns once the work is scheduled. The handle
    /// resolves to a [`TriggerSummary`] when every endpoint has finished.
    /// Dropping the handle does not cancel the trigger.
    ///
    /// A call that races with [`close`](Self::close) either fails with
    /// [`DispatchError::EngineClosed`] or returns a handle that `close()`
    /// cancels and waits for like any other outstanding trigger.
    pub fn trigger<R: RequestFn>(&self, topic: &str, request: R) -> Result<TriggerHandle, DispatchError> {
        if !self.is_running() {
            metric_inc("webhook.trigger.rejected");
            return Err(DispatchError::EngineClosed);
        }

        let endpoints = match self.registry.get(topic) {
            Ok(endpoints) => endpoints,
            Err(err) => match self.config.missing_topic {
                MissingTopicPolicy::Fail => {
                    metric_inc("webhook.trigger.unknown_topic");
                    return Err(err.into());
                }
                MissingTopicPolicy::Empty => EndpointSet::new(),
            },
        };

        // `close()` may have flipped the flag since the check above. It
        // cancels the engine token right after, so a child born cancelled
        // means the engine is closing.
        let cancel = self.cancel.child_token();
        if cancel.is_cancelled() {
            metric_inc("webhook.trigger.rejected");
            return Err(DispatchError::EngineClosed);
        }

        let trigger_id = TriggerId(self.next_trigger_id.fetch_add(1, Ordering::Relaxed));
        let ctx = Arc::new(TriggerContext {
            trigger_id,
            topic: topic.to_string(),
            request: Arc::new(request),
            stream: self.stream.clone(),
            in_flight: self.in_flight.clone(),
            cancel: cancel.clone(),
        });

        metric_inc("webhook.trigger.started");
        tracing::info!(
            trigger_id = %trigger_id,
            topic = topic,
            endpoints = endpoints.len(),
            mode = ?self.config.mode,
            "Trigger started"
        );

        let join = match self.config.mode {
            DispatchMode::Concurrent => {
                let mut tasks = JoinSet::new();
                for endpoint in endpoints.iter() {
                    tasks.spawn(self.tracker.track_future(run_endpoint(ctx.clone(), endpoint.clone())));
                }
                self.tracker.spawn(collect(ctx, tasks, endpoints.len()))
            }
            DispatchMode::Sequential => {
                self.tracker.spawn(run_sequential(ctx, endpoints.clone(), self.tracker.clone()))
            }
        };

        Ok(TriggerHandle {
            id: trigger_id,
            topic: topic.to_string(),
            endpoints,
            cancel,
            join,
        })
    }

    /// Trigger `topic` and gather exactly the records of that call.
    pub async fn trigger_collect<R: RequestFn>(
        &self,
        topic: &str,
        request: R,
    ) -> Result<Vec<ResponseRecord>, DispatchError> {
        // Subscribe first so no record of this trigger can be missed.
        let mut subscriber = self.subscribe();
        let mut handle = self.trigger(topic, request)?;
        let id = handle.id();
        let mut records = Vec::new();

        let summary = loop {
            tokio::select! {
                summary = &mut handle => break summary?,
                record = subscriber.recv() => match record {
                    Some(record) if record.trigger_id == id => records.push(record),
                    Some(_) => {}
                    None => break (&mut handle).await?,
                },
            }
        };

        // Every publish finished before the summary resolved, so whatever
        // is still owed to us is already buffered.
        while records.len() < summary.published() {
            match subscriber.try_recv() {
                Some(record) if record.trigger_id == id => records.push(record),
                Some(_) => {}
                None => break,
            }
        }

        Ok(records)
    }

    /// Cancel every outstanding trigger and refuse new ones.
    ///
    /// Waits until all tasks started by this dispatcher have stopped, then
    /// closes the response stream. Safe to call more than once.
    pub async fn close(&self) {
        let was_running = self.is_running.swap(false, Ordering::SeqCst);

        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.stream.close();

        if was_running {
            tracing::info!("Dispatcher closed");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Handle to one in-flight trigger call.
///
/// Awaiting the handle yields the trigger's [`TriggerSummary`].
pub struct TriggerHandle {
    id: TriggerId,
    topic: String,
    endpoints: EndpointSet,
    cancel: CancellationToken,
    join: JoinHandle<TriggerSummary>,
}

impl TriggerHandle {
    pub fn id(&self) -> TriggerId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The dispatch snapshot this trigger works against.
    pub fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }

    /// Cancel this trigger only.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl Future for TriggerHandle {
    type Output = Result<TriggerSummary, DispatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.join)
            .poll(cx)
            .map(|joined| joined.map_err(|_| DispatchError::Aborted))
    }
}
