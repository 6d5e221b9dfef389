use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::FailureReason;
use crate::request::RequestFn;
use crate::types::{Endpoint, WebhookResponse};

/// HTTP transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct HttpPoster {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl HttpPoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuse an existing client (and its connection pool).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: None,
        }
    }

    /// Limit each request to `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build a request function that POSTs `body` with `headers` to every
    /// endpoint of a trigger.
    ///
    /// Each header name carries a list of values; all of them are sent.
    pub fn post(
        &self,
        body: impl Into<Bytes>,
        headers: Vec<(String, Vec<String>)>,
    ) -> PostRequest {
        PostRequest {
            client: self.client.clone(),
            timeout: self.timeout,
            body: body.into(),
            headers,
        }
    }
}

/// A prepared POST, issued once per endpoint.
#[derive(Debug, Clone)]
pub struct PostRequest {
    client: reqwest::Client,
    timeout: Option<Duration>,
    body: Bytes,
    headers: Vec<(String, Vec<String>)>,
}

#[async_trait]
impl RequestFn for PostRequest {
    async fn call(&self, endpoint: &Endpoint) -> Result<WebhookResponse, FailureReason> {
        let mut request = self
            .client
            .post(endpoint.as_str())
            .body(self.body.clone());

        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        for (name, values) in &self.headers {
            for value in values {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let response = request.send().await.map_err(classify_error)?;
        let status = response.status().as_u16();
        classify_status(status)?;

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(classify_error)?;

        Ok(WebhookResponse {
            status,
            headers,
            body,
        })
    }
}

fn classify_status(status: u16) -> Result<(), FailureReason> {
    match status {
        200..=299 => Ok(()),
        400..=499 => Err(FailureReason::ClientError(status)),
        _ => Err(FailureReason::RemoteError(status)),
    }
}

fn classify_error(err: reqwest::Error) -> FailureReason {
    if err.is_timeout() {
        FailureReason::Timeout
    } else if err.is_builder() {
        FailureReason::InvalidRequest(err.to_string())
    } else {
        FailureReason::Network(err.to_string())
    }
}
