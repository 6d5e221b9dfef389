use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{EndpointError, FailureReason};

/// Network address that receives dispatched requests for a topic.
///
/// Endpoints are absolute `http`/`https` URLs stored in normalized form:
/// scheme and host are lower-cased, default ports are dropped and an empty
/// path becomes `/`. Two endpoints are equal when their normalized strings
/// are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint(String);

impl Endpoint {
    /// Parse and normalize an endpoint address.
    pub fn parse(input: &str) -> Result<Self, EndpointError> {
        let url = url::Url::parse(input.trim()).map_err(|err| EndpointError::Invalid {
            input: input.to_string(),
            reason: err.to_string(),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(EndpointError::Invalid {
                input: input.to_string(),
                reason: format!("unsupported scheme {:?}", url.scheme()),
            });
        }

        if !url.has_host() {
            return Err(EndpointError::Invalid {
                input: input.to_string(),
                reason: "missing host".to_string(),
            });
        }

        Ok(Self(url.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = EndpointError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for Endpoint {
    type Error = EndpointError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.0
    }
}

impl AsRef<str> for Endpoint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Ordered collection of unique endpoints registered under one topic.
///
/// The set is copy-on-write. Cloning it is cheap, and a clone never
/// observes later changes made through the registry, which is what makes
/// a clone usable as a dispatch snapshot.
///
/// Membership checks scan the list, so [`TopicRegistry::add_all`] is
/// quadratic in the topic's size. Topics are expected to hold tens of
/// endpoints, not thousands.
///
/// [`TopicRegistry::add_all`]: crate::TopicRegistry::add_all
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointSet {
    endpoints: Arc<Vec<Endpoint>>,
}

impl EndpointSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.endpoints.contains(endpoint)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Endpoint> {
        self.endpoints.iter()
    }

    pub fn as_slice(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn to_vec(&self) -> Vec<Endpoint> {
        self.endpoints.as_ref().clone()
    }

    /// Append `endpoint` unless it is already present.
    pub(crate) fn insert(&mut self, endpoint: Endpoint) -> bool {
        if self.contains(&endpoint) {
            return false;
        }
        Arc::make_mut(&mut self.endpoints).push(endpoint);
        true
    }

    pub(crate) fn remove(&mut self, endpoint: &Endpoint) -> bool {
        let Some(index) = self.endpoints.iter().position(|e| e == endpoint) else {
            return false;
        };
        Arc::make_mut(&mut self.endpoints).remove(index);
        true
    }
}

impl<'a> IntoIterator for &'a EndpointSet {
    type Item = &'a Endpoint;
    type IntoIter = std::slice::Iter<'a, Endpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<Endpoint> for EndpointSet {
    fn from_iter<I: IntoIterator<Item = Endpoint>>(iter: I) -> Self {
        let mut set = EndpointSet::new();
        for endpoint in iter {
            set.insert(endpoint);
        }
        set
    }
}

/// Serializable form of the whole registry, exchanged with stores.
pub type TopicMap = BTreeMap<String, Vec<Endpoint>>;

/// Identifier of a single trigger call, unique per dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerId(pub u64);

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// HTTP result returned by an endpoint.
///
/// The dispatcher treats the response as opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl WebhookResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First value of the header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// One dispatch result as published on the response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRecord {
    pub trigger_id: TriggerId,
    pub topic: String,
    pub endpoint: Endpoint,
    pub outcome: Result<WebhookResponse, FailureReason>,
}

impl ResponseRecord {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn response(&self) -> Option<&WebhookResponse> {
        self.outcome.as_ref().ok()
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        self.outcome.as_ref().err()
    }
}

/// What a publisher does when a subscriber's buffer is full.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait until the subscriber has room.
    #[default]
    Block,
    /// Drop the record for that subscriber only.
    DropNewest,
}

/// How `trigger` treats a topic that is not registered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissingTopicPolicy {
    /// Reject the trigger with `DispatchError::UnknownTopic`.
    #[default]
    Fail,
    /// Treat the topic as having no endpoints.
    Empty,
}

/// How the endpoints of one trigger are contacted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// One task per endpoint, all running at once.
    #[default]
    Concurrent,
    /// One endpoint after the other, in registration order.
    Sequential,
}
