//! One backend-side channel to a frontend view.
//!
//! Outbound requests go through [`Channel`]; callbacks are matched to their
//! [`Query`] by a [`ChannelReader`] that drains the comm's incoming messages.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::bridge::protocol::{Action, Callback, Command, CommId, Invoke, Outcome};
use crate::error::QueryError;
use crate::host::{Comm, Connection, MessageReceiver};

type Waiters = DashMap<String, oneshot::Sender<Outcome>>;

struct Shared {
    comm: Comm,
    waiters: Waiters,
}

impl Shared {
    fn send(&self, action: Action) -> Result<(), QueryError> {
        let data = serde_json::to_value(&action).map_err(|e| QueryError::Encode(e.to_string()))?;
        self.comm.send(data)?;
        Ok(())
    }
}

/// Sending side of a channel. Cloning shares the waiter table.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<Shared>,
}

/// Drains a channel's inbound callbacks. Run it on its own task.
pub struct ChannelReader {
    shared: Arc<Shared>,
    incoming: MessageReceiver,
}

impl Channel {
    pub fn new(connection: Connection) -> (Self, ChannelReader) {
        let shared = Arc::new(Shared {
            comm: connection.comm,
            waiters: DashMap::new(),
        });
        let reader = ChannelReader {
            shared: Arc::clone(&shared),
            incoming: connection.incoming,
        };
        (Self { shared }, reader)
    }

    pub fn id(&self) -> CommId {
        self.shared.comm.id()
    }

    /// Fire-and-forget invocation.
    pub fn call(&self, invoke: Invoke) -> Result<(), QueryError> {
        self.shared.send(Action::Call(invoke))
    }

    /// Request/response invocation. Dropping the returned [`Query`] before it
    /// resolves cancels the request on the frontend.
    pub fn query(&self, invoke: Invoke) -> Result<Query, QueryError> {
        let identifier = uuid::Uuid::new_v4().simple().to_string();
        let (tx, rx) = oneshot::channel();
        self.shared.waiters.insert(identifier.clone(), tx);

        let sent = self.shared.send(Action::Query {
            identifier: identifier.clone(),
            data: invoke,
        });
        if let Err(e) = sent {
            self.shared.waiters.remove(&identifier);
            return Err(e);
        }

        tracing::trace!(%identifier, comm_id = %self.id(), "Sent query");
        Ok(Query {
            identifier,
            rx,
            shared: Arc::clone(&self.shared),
            done: false,
        })
    }

    /// Queries still waiting for a callback.
    pub fn in_flight(&self) -> usize {
        self.shared.waiters.len()
    }
}

impl ChannelReader {
    pub async fn run(mut self) {
        while let Some(message) = self.incoming.recv().await {
            match serde_json::from_value::<Command>(message.data().clone()) {
                Ok(Command::Callback(callback)) => self.settle(callback),
                Ok(Command::Register { .. }) | Err(_) => {
                    let command = message.data().get("command").cloned().unwrap_or(Value::Null);
                    tracing::warn!(%command, "Unsupported command {command}");
                }
            }
        }
        // Dropping the senders resolves every outstanding query as closed.
        self.shared.waiters.clear();
        tracing::debug!(comm_id = %self.shared.comm.id(), "Channel reader finished");
    }

    fn settle(&self, callback: Callback) {
        let Callback {
            outcome,
            identifier,
        } = callback;
        match self.shared.waiters.remove(&identifier) {
            Some((_, tx)) => {
                let _ = tx.send(outcome);
            }
            None => tracing::warn!(%identifier, "No pending callback for {identifier}"),
        }
    }
}

/// A query awaiting its callback.
#[must_use = "dropping a query cancels it"]
pub struct Query {
    identifier: String,
    rx: oneshot::Receiver<Outcome>,
    shared: Arc<Shared>,
    done: bool,
}

impl Query {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl Future for Query {
    type Output = Result<Value, QueryError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(outcome)) => outcome.into_result().map_err(QueryError::Remote),
            Poll::Ready(Err(_)) => Err(QueryError::ChannelClosed(self.identifier.clone())),
        };
        self.done = true;
        Poll::Ready(result)
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        if self.done || self.shared.waiters.remove(&self.identifier).is_none() {
            return;
        }
        tracing::debug!(identifier = %self.identifier, "Query dropped, cancelling");
        let cancel = Action::Cancel {
            identifier: self.identifier.clone(),
        };
        if let Err(e) = self.shared.send(cancel) {
            tracing::debug!(identifier = %self.identifier, error = %e, "Failed to send cancel");
        }
    }
}
