use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::request::RequestFn;
use crate::stream::ResponseStream;
use crate::types::{Endpoint, EndpointSet, ResponseRecord, TriggerId};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Shared, read-only context for the tasks of one trigger.
pub(crate) struct TriggerContext {
    pub trigger_id: TriggerId,
    pub topic: String,

    /// Request issued against every endpoint of the snapshot.
    pub request: Arc<dyn RequestFn>,

    /// Where results are published.
    pub stream: ResponseStream,

    /// Engine-wide concurrency limiter.
    pub in_flight: Arc<Semaphore>,

    /// Child of the engine token; cancelled by `close()` or the handle.
    pub cancel: CancellationToken,
}

/// How a single endpoint task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EndpointOutcome {
    Delivered,
    Failed,
    Cancelled,
}

/// Final accounting of one trigger call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSummary {
    pub trigger_id: TriggerId,
    pub topic: String,
    /// Size of the dispatch snapshot.
    pub endpoints: usize,
    /// Records published with a successful response.
    pub delivered: usize,
    /// Records published with a failure.
    pub failed: usize,
    /// Endpoints abandoned because the trigger was cancelled.
    pub cancelled: usize,
    /// Endpoints whose request panicked; nothing was published for them.
    pub panicked: usize,
}

impl TriggerSummary {
    pub(crate) fn new(trigger_id: TriggerId, topic: String, endpoints: usize) -> Self {
        Self {
            trigger_id,
            topic,
            endpoints,
            delivered: 0,
            failed: 0,
            cancelled: 0,
            panicked: 0,
        }
    }

    /// Number of records this trigger put on the response stream.
    pub fn published(&self) -> usize {
        self.delivered + self.failed
    }

    pub fn is_complete(&self) -> bool {
        self.cancelled == 0 && self.panicked == 0
    }

    fn absorb(&mut self, joined: Result<EndpointOutcome, JoinError>) {
        match joined {
            Ok(EndpointOutcome::Delivered) => self.delivered += 1,
            Ok(EndpointOutcome::Failed) => self.failed += 1,
            Ok(EndpointOutcome::Cancelled) => self.cancelled += 1,
            Err(err) if err.is_panic() => {
                metric_inc("webhook.delivery.panicked");
                tracing::warn!(
                    trigger_id = %self.trigger_id,
                    topic = %self.topic,
                    "Endpoint request panicked"
                );
                self.panicked += 1;
            }
            Err(_) => self.cancelled += 1,
        }
    }
}

/// Contact one endpoint and publish the result.
///
/// Cancellation is observed while waiting for a permit, while the request
/// is in flight and while publishing. Once observed, nothing is published.
pub(crate) async fn run_endpoint(ctx: Arc<TriggerContext>, endpoint: Endpoint) -> EndpointOutcome {
    let permit = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return EndpointOutcome::Cancelled,
        permit = ctx.in_flight.clone().acquire_owned() => match permit {
            Ok(p) => p,
            Err(_) => return EndpointOutcome::Cancelled,
        },
    };

    let result = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            tracing::debug!(
                trigger_id = %ctx.trigger_id,
                endpoint = %endpoint,
                "Request cancelled"
            );
            return EndpointOutcome::Cancelled;
        }
        result = ctx.request.call(&endpoint) => result,
    };

    // Release the permit before a possibly blocking publish.
    drop(permit);

    let outcome = match &result {
        Ok(response) => {
            metric_inc("webhook.delivery.success");
            tracing::debug!(
                trigger_id = %ctx.trigger_id,
                topic = %ctx.topic,
                endpoint = %endpoint,
                status = response.status,
                "Endpoint responded"
            );
            EndpointOutcome::Delivered
        }
        Err(reason) => {
            metric_inc("webhook.delivery.failure");
            tracing::warn!(
                trigger_id = %ctx.trigger_id,
                topic = %ctx.topic,
                endpoint = %endpoint,
                error = %reason,
                "Endpoint request failed"
            );
            EndpointOutcome::Failed
        }
    };

    let record = ResponseRecord {
        trigger_id: ctx.trigger_id,
        topic: ctx.topic.clone(),
        endpoint,
        outcome: result,
    };

    // `publish` is all-or-nothing when dropped, so a cancelled endpoint has
    // reached no subscriber.
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => EndpointOutcome::Cancelled,
        _ = ctx.stream.publish(record) => outcome,
    }
}

/// Wait for every endpoint task of a concurrent trigger.
pub(crate) async fn collect(
    ctx: Arc<TriggerContext>,
    mut tasks: JoinSet<EndpointOutcome>,
    endpoints: usize,
) -> TriggerSummary {
    let mut summary = TriggerSummary::new(ctx.trigger_id, ctx.topic.clone(), endpoints);
    while let Some(joined) = tasks.join_next().await {
        summary.absorb(joined);
    }
    finish(&summary);
    summary
}

/// Contact the snapshot one endpoint at a time, in registration order.
///
/// Each request still runs in its own task so a panic stays confined to
/// that endpoint.
pub(crate) async fn run_sequential(
    ctx: Arc<TriggerContext>,
    endpoints: EndpointSet,
    tracker: TaskTracker,
) -> TriggerSummary {
    let mut summary = TriggerSummary::new(ctx.trigger_id, ctx.topic.clone(), endpoints.len());

    for (index, endpoint) in endpoints.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            summary.cancelled += endpoints.len() - index;
            break;
        }
        let joined = tracker
            .spawn(run_endpoint(ctx.clone(), endpoint.clone()))
            .await;
        summary.absorb(joined);
    }

    finish(&summary);
    summary
}

fn finish(summary: &TriggerSummary) {
    metric_inc("webhook.trigger.completed");
    tracing::info!(
        trigger_id = %summary.trigger_id,
        topic = %summary.topic,
        endpoints = summary.endpoints,
        delivered = summary.delivered,
        failed = summary.failed,
        cancelled = summary.cancelled,
        panicked = summary.panicked,
        "Trigger finished"
    );
}
