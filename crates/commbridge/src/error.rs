//! Error types shared across the bridge.
//!
//! Messages for resolution and cancellation failures are shown to notebook
//! users verbatim (in the error log and in `callback` replies), so their
//! wording is part of the protocol surface.

/// Failures of the comm host: readiness, target registration, closed comms.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// A readiness signal was dropped before it reported ready.
    #[error("{0} was dropped before it became ready")]
    NotReady(&'static str),

    #[error("comm target {0} is already registered")]
    TargetTaken(String),

    /// The listener for a target went away before anything connected to it.
    #[error("comm target {0} was unregistered before the remote side connected")]
    TargetDropped(String),

    #[error("comm {0} is closed")]
    Closed(String),
}

/// Failure raised by an endpoint, either synchronously or from its deferred result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct EndpointError {
    message: String,
}

impl EndpointError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for EndpointError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Errors produced while dispatching an inbound message on the frontend side.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("Unsupported action {0}.")]
    UnsupportedAction(String),

    #[error("Malformed {action} message: {reason}")]
    Malformed { action: String, reason: String },

    #[error("No ref=\"{0}\" found in component.")]
    NoSuchTarget(String),

    #[error("No function {endpoint} found in component {target}.")]
    NoSuchEndpoint { target: String, endpoint: String },

    #[error("Cannot call {target}.{endpoint} with arguments since it is not a function.")]
    NotCallable { target: String, endpoint: String },

    #[error(transparent)]
    Invocation(#[from] EndpointError),

    #[error(
        "Cannot cancel request {0}. No cancellation for this request available anymore."
    )]
    NoCancellation(String),

    #[error("Cannot cancel request {0}. The endpoint does not support cancellation.")]
    NotCancellable(String),

    #[error("Request {0} is already in flight.")]
    DuplicateIdentifier(String),

    #[error(transparent)]
    Host(#[from] HostError),
}

impl BridgeError {
    pub fn malformed(action: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Malformed {
            action: action.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failures seen by the backend when querying frontend endpoints.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// The frontend answered with an error callback.
    #[error("{0}")]
    Remote(String),

    #[error("channel closed before request {0} was answered")]
    ChannelClosed(String),

    #[error("Cannot query when there is nothing displayed in the frontend yet.")]
    NothingDisplayed,

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("failed to encode request: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_messages_name_target_and_endpoint() {
        assert_eq!(
            BridgeError::NoSuchTarget("plot".into()).to_string(),
            "No ref=\"plot\" found in component."
        );
        assert_eq!(
            BridgeError::NoSuchEndpoint {
                target: "plot".into(),
                endpoint: "zoom".into()
            }
            .to_string(),
            "No function zoom found in component plot."
        );
        assert_eq!(
            BridgeError::NotCallable {
                target: "plot".into(),
                endpoint: "title".into()
            }
            .to_string(),
            "Cannot call plot.title with arguments since it is not a function."
        );
    }

    #[test]
    fn invocation_error_is_transparent() {
        let err = BridgeError::from(EndpointError::new("division by zero"));
        assert_eq!(err.to_string(), "division by zero");
    }

    #[test]
    fn cancellation_diagnostics_name_the_request() {
        assert_eq!(
            BridgeError::NoCancellation("7".into()).to_string(),
            "Cannot cancel request 7. No cancellation for this request available anymore."
        );
        assert_eq!(
            QueryError::NothingDisplayed.to_string(),
            "Cannot query when there is nothing displayed in the frontend yet."
        );
    }
}
