//! Live, multi-subscriber stream of dispatch results.
//!
//! Every subscriber owns a bounded channel. Publishing clones the record
//! into each subscriber's channel; what happens when a channel is full is
//! decided by the [`OverflowPolicy`]. Subscribers only see records
//! published after they attached.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::types::{OverflowPolicy, ResponseRecord};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<ResponseRecord>,
}

struct Hub {
    subscribers: Vec<Subscriber>,
    next_id: u64,
    closed: bool,
}

/// Publishing side of the response stream. Cheap to clone.
#[derive(Clone)]
pub struct ResponseStream {
    hub: Arc<Mutex<Hub>>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl ResponseStream {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub {
                subscribers: Vec::new(),
                next_id: 0,
                closed: false,
            })),
            capacity: capacity.max(1),
            policy,
        }
    }

    /// Attach a new subscriber.
    ///
    /// Subscribing to a closed stream yields a subscriber that is already
    /// at end-of-stream.
    pub fn subscribe(&self) -> ResponseSubscriber {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut hub = self.hub.lock();
        if !hub.closed {
            let id = hub.next_id;
            hub.next_id += 1;
            hub.subscribers.push(Subscriber { id, tx });
            tracing::debug!(subscriber = id, "Response stream subscriber attached");
        }
        ResponseSubscriber { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        let mut hub = self.hub.lock();
        hub.subscribers.retain(|s| !s.tx.is_closed());
        hub.subscribers.len()
    }

    /// Deliver `record` to every attached subscriber.
    ///
    /// Returns the number of subscribers that accepted the record. Under
    /// [`OverflowPolicy::Block`] this waits for room in each full buffer.
    ///
    /// Cancel safe: a slot is reserved in every buffer before any record is
    /// sent, so dropping the future early delivers to no subscriber.
    pub async fn publish(&self, record: ResponseRecord) -> usize {
        // Never hold the hub lock across an await.
        let targets: Vec<(u64, mpsc::Sender<ResponseRecord>)> = {
            let hub = self.hub.lock();
            hub.subscribers
                .iter()
                .map(|s| (s.id, s.tx.clone()))
                .collect()
        };

        let mut delivered = 0;
        let mut gone = Vec::new();

        match self.policy {
            OverflowPolicy::Block => {
                // All reservations happen before the first send. Subscribers
                // are always reserved in attach order.
                let mut permits = Vec::with_capacity(targets.len());
                for (id, tx) in &targets {
                    match tx.reserve().await {
                        Ok(permit) => permits.push(permit),
                        Err(_) => gone.push(*id),
                    }
                }
                for permit in permits {
                    permit.send(record.clone());
                    delivered += 1;
                }
            }
            OverflowPolicy::DropNewest => {
                for (id, tx) in &targets {
                    match tx.try_send(record.clone()) {
                        Ok(()) => delivered += 1,
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            metric_inc("webhook.stream.dropped");
                            tracing::warn!(
                                subscriber = *id,
                                trigger_id = %record.trigger_id,
                                topic = %record.topic,
                                "Subscriber buffer full, record dropped"
                            );
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => gone.push(*id),
                    }
                }
            }
        }

        if !gone.is_empty() {
            let mut hub = self.hub.lock();
            hub.subscribers.retain(|s| !gone.contains(&s.id));
        }

        metric_inc("webhook.stream.published");
        delivered
    }

    /// Detach every subscriber. Each drains what is buffered and then sees
    /// end-of-stream. Later subscriptions start closed.
    pub fn close(&self) {
        let mut hub = self.hub.lock();
        hub.closed = true;
        hub.subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.hub.lock().closed
    }
}

/// Receiving side of the response stream.
pub struct ResponseSubscriber {
    rx: mpsc::Receiver<ResponseRecord>,
}

impl ResponseSubscriber {
    /// Next record, or `None` once the stream is closed and drained.
    pub async fn recv(&mut self) -> Option<ResponseRecord> {
        self.rx.recv().await
    }

    /// Next buffered record without waiting.
    pub fn try_recv(&mut self) -> Option<ResponseRecord> {
        self.rx.try_recv().ok()
    }

    pub fn into_stream(self) -> ReceiverStream<ResponseRecord> {
        ReceiverStream::new(self.rx)
    }
}
