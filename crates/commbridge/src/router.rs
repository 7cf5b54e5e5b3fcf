//! Request router - dispatches inbound actions on the bound channel.
//!
//! - `call`: invoke, observe a deferred result only for failure, never reply
//! - `query`: invoke, track deferred results in the pending table, reply with `callback`
//! - `cancel`: fire the pending entry's cancel handle
//!
//! Dispatch itself is synchronous. Deferred results are awaited on spawned
//! tasks, but their pending entries are inserted before dispatch returns, so
//! a `cancel` that arrives next always finds them.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::bridge::protocol::{Action, Callback, CommMessage, Command, Invoke, Outcome};
use crate::endpoint::{Invocation, Refs};
use crate::error::BridgeError;
use crate::error_log::ErrorLog;
use crate::host::Comm;
use crate::pending::PendingRequests;

pub struct Router {
    refs: Refs,
    comm: Comm,
    pending: Arc<PendingRequests>,
    errors: ErrorLog,
}

impl Router {
    pub fn new(refs: Refs, comm: Comm, errors: ErrorLog) -> Self {
        Self {
            refs,
            comm,
            pending: PendingRequests::new(),
            errors,
        }
    }

    pub fn pending(&self) -> &Arc<PendingRequests> {
        &self.pending
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    /// Dispatch one inbound message.
    ///
    /// Returns the task observing a deferred result, if one was spawned.
    /// Errors returned here have already been recorded in the error log.
    pub fn handle(&self, message: &CommMessage) -> Result<Option<JoinHandle<()>>, BridgeError> {
        let payload = message.data();
        let action = match Action::from_payload(payload) {
            Ok(action) => action,
            Err(e) => {
                // A malformed query still gets a reply if it names an identifier.
                if let Some(identifier) = malformed_query_identifier(payload, &e) {
                    self.reply(Callback::error(identifier, e.to_string()));
                    return Ok(None);
                }
                self.record(&e);
                return Err(e);
            }
        };

        tracing::debug!(action = action.name(), "Dispatching");
        match action {
            Action::Call(invoke) => self.call(invoke).inspect_err(|e| self.record(e)),
            Action::Query { identifier, data } => Ok(self.query(identifier, data)),
            Action::Cancel { identifier } => {
                self.cancel(&identifier);
                Ok(None)
            }
        }
    }

    fn call(&self, invoke: Invoke) -> Result<Option<JoinHandle<()>>, BridgeError> {
        let label = format!("{}.{}", invoke.target, invoke.endpoint);
        match self.refs.resolve(invoke)? {
            Invocation::Immediate(_) => Ok(None),
            Invocation::Deferred { future, .. } => {
                let errors = self.errors.clone();
                Ok(Some(tokio::spawn(async move {
                    if let Err(e) = future.await {
                        tracing::error!(endpoint = %label, error = %e, "Call failed");
                        errors.push(e.to_string());
                    }
                })))
            }
        }
    }

    fn query(&self, identifier: String, invoke: Invoke) -> Option<JoinHandle<()>> {
        // Checked before resolving so a rejected duplicate never runs its endpoint.
        if self.pending.contains(&identifier) {
            self.reject_duplicate(identifier);
            return None;
        }

        let invocation = match self.refs.resolve(invoke) {
            Ok(invocation) => invocation,
            Err(e) => {
                tracing::debug!(%identifier, error = %e, "Query failed to resolve");
                self.reply(Callback::error(identifier, e.to_string()));
                return None;
            }
        };

        let (future, cancel) = match invocation {
            Invocation::Immediate(value) => {
                self.reply(Callback::value(identifier, value));
                return None;
            }
            Invocation::Deferred { future, cancel } => (future, cancel),
        };

        let guard = match self.pending.register(&identifier, cancel) {
            Ok(guard) => guard,
            Err(_) => {
                self.reject_duplicate(identifier);
                return None;
            }
        };

        let comm = self.comm.clone();
        let errors = self.errors.clone();
        Some(tokio::spawn(async move {
            let outcome = match future.await {
                Ok(value) => Outcome::Value(value),
                Err(e) => Outcome::Error(e.to_string()),
            };
            // The entry must be gone before the backend hears about the result.
            drop(guard);
            send_callback(&comm, &errors, Callback { outcome, identifier });
        }))
    }

    fn cancel(&self, identifier: &str) {
        match self.pending.cancel(identifier) {
            Ok(()) => tracing::debug!(%identifier, "Cancellation requested"),
            Err(e) => {
                tracing::warn!(%identifier, error = %e, "Cancellation unavailable");
                self.errors.push(e.to_string());
            }
        }
    }

    fn reject_duplicate(&self, identifier: String) {
        tracing::warn!(%identifier, "Rejecting query with an identifier already in flight");
        let error = BridgeError::DuplicateIdentifier(identifier.clone());
        self.reply(Callback::error(identifier, error.to_string()));
    }

    fn reply(&self, callback: Callback) {
        send_callback(&self.comm, &self.errors, callback);
    }

    fn record(&self, error: &BridgeError) {
        tracing::error!(error = %error, "Failed to handle message");
        self.errors.push(error.to_string());
    }
}

fn send_callback(comm: &Comm, errors: &ErrorLog, callback: Callback) {
    let identifier = callback.identifier.clone();
    let is_error = callback.outcome.is_error();
    let sent = serde_json::to_value(Command::Callback(callback))
        .map_err(|e| e.to_string())
        .and_then(|data| comm.send(data).map_err(|e| e.to_string()));

    match sent {
        Ok(()) => tracing::trace!(%identifier, is_error, "Sent callback"),
        Err(e) => {
            tracing::error!(%identifier, error = %e, "Failed to send callback");
            errors.push(format!("Failed to answer request {identifier}: {e}"));
        }
    }
}

fn malformed_query_identifier(payload: &Value, error: &BridgeError) -> Option<String> {
    match error {
        BridgeError::Malformed { action, .. } if action == "query" => payload
            .get("data")
            .and_then(|data| data.get("identifier"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}
