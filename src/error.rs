use std::fmt;

/// Errors returned by topic registry reads and endpoint removals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The topic has never been registered, or was removed.
    UnknownTopic(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::UnknownTopic(topic) =>
                write!(f, "unknown topic: {}", topic),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Errors returned when a trigger cannot be started or supervised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Topic is not registered and the dispatcher is configured to fail.
    UnknownTopic(String),

    /// Dispatcher has been closed.
    /// No further triggers are accepted.
    EngineClosed,

    /// The trigger's supervising task was aborted before it could report.
    Aborted,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::UnknownTopic(topic) =>
                write!(f, "unknown topic: {}", topic),
            DispatchError::EngineClosed =>
                write!(f, "dispatcher is closed"),
            DispatchError::Aborted =>
                write!(f, "trigger task aborted"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<RegistryError> for DispatchError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownTopic(topic) => DispatchError::UnknownTopic(topic),
        }
    }
}

/// Returned when a string cannot be used as an endpoint address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    Invalid {
        input: String,
        reason: String,
    },
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointError::Invalid { input, reason } =>
                write!(f, "invalid endpoint {:?}: {}", input, reason),
        }
    }
}

impl std::error::Error for EndpointError {}

/// Reasons why a single endpoint request failed.
///
/// Failures are isolated to the endpoint they occurred on and are
/// published on the response stream instead of aborting the trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Timeout,
    Network(String),
    /// Non-success status other than 4xx.
    RemoteError(u16),
    /// 4xx status.
    ClientError(u16),
    /// The request could not be built.
    InvalidRequest(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout =>
                write!(f, "request timed out"),
            FailureReason::Network(msg) =>
                write!(f, "network error: {}", msg),
            FailureReason::RemoteError(status) =>
                write!(f, "remote endpoint returned error status {}", status),
            FailureReason::ClientError(status) =>
                write!(f, "remote endpoint rejected request with status {}", status),
            FailureReason::InvalidRequest(msg) =>
                write!(f, "invalid request: {}", msg),
        }
    }
}

impl std::error::Error for FailureReason {}

/// Errors raised by a persistence store while loading or persisting topics.
#[derive(Debug)]
pub enum PersistenceError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    /// Error reported by an external backend (Redis, PostgreSQL).
    Backend(String),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::Io(err) =>
                write!(f, "storage io error: {}", err),
            PersistenceError::Serialization(err) =>
                write!(f, "storage serialization error: {}", err),
            PersistenceError::Backend(msg) =>
                write!(f, "storage backend error: {}", msg),
        }
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PersistenceError::Io(err) => Some(err),
            PersistenceError::Serialization(err) => Some(err),
            PersistenceError::Backend(_) => None,
        }
    }
}

impl From<std::io::Error> for PersistenceError {
    fn from(err: std::io::Error) -> Self {
        PersistenceError::Io(err)
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Serialization(err)
    }
}
