use std::future::Future;

use async_trait::async_trait;

use crate::error::FailureReason;
use crate::types::{Endpoint, WebhookResponse};

/// Issues the request for one endpoint of a trigger.
///
/// One value is supplied per trigger call and shared by all of that
/// trigger's endpoint tasks, so implementations must be callable
/// concurrently. Any async closure taking an [`Endpoint`] qualifies:
///
/// ```no_run
/// # use webhook_fanout::{Endpoint, WebhookResponse, FailureReason};
/// let request = |endpoint: Endpoint| async move {
///     let _ = endpoint;
///     Ok::<_, FailureReason>(WebhookResponse::new(200))
/// };
/// # let _ = request;
/// ```
#[async_trait]
pub trait RequestFn: Send + Sync + 'static {
    async fn call(&self, endpoint: &Endpoint) -> Result<WebhookResponse, FailureReason>;
}

#[async_trait]
impl<F, Fut> RequestFn for F
where
    F: Fn(Endpoint) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<WebhookResponse, FailureReason>> + Send,
{
    async fn call(&self, endpoint: &Endpoint) -> Result<WebhookResponse, FailureReason> {
        (self)(endpoint.clone()).await
    }
}
