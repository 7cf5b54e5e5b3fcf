//! Kernel-side widget that reaches frontend endpoints.
//!
//! Each frontend view announces its private target with a `register`
//! handshake on `{model_id}-comm-widget`; the widget opens a [`Channel`] to
//! every announced target and fans requests out over them.

mod channel;

pub use channel::{Channel, ChannelReader, Query};

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{select_all, try_join_all};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bridge::protocol::{CommId, Command, Invoke};
use crate::error::{HostError, QueryError};
use crate::host::{CommManager, Connection, TargetListener};

struct Views {
    channels: DashMap<CommId, Channel>,
    count: watch::Sender<usize>,
}

impl Views {
    fn add(&self, channel: Channel) {
        self.channels.insert(channel.id(), channel);
        self.count.send_replace(self.channels.len());
    }

    fn remove(&self, id: &CommId) {
        self.channels.remove(id);
        self.count.send_replace(self.channels.len());
    }

    fn snapshot(&self) -> Vec<Channel> {
        self.channels.iter().map(|entry| entry.value().clone()).collect()
    }
}

/// Backend widget bound to one model id.
pub struct CommWidget {
    target: String,
    views: Arc<Views>,
    accept_task: JoinHandle<()>,
}

impl CommWidget {
    /// Listen for frontend handshakes on `{model_id}-comm-widget`.
    pub fn new(manager: &CommManager, model_id: &str) -> Result<Self, HostError> {
        let target = format!("{model_id}-comm-widget");
        let listener = manager.register_target(&target)?;
        let (count, _) = watch::channel(0);
        let views = Arc::new(Views {
            channels: DashMap::new(),
            count,
        });

        let accept_task = tokio::spawn(accept_loop(
            listener,
            manager.clone(),
            Arc::clone(&views),
        ));
        tracing::debug!(%target, "Comm widget listening");

        Ok(Self {
            target,
            views,
            accept_task,
        })
    }

    /// The well-known target frontends send their handshake to.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn channel_count(&self) -> usize {
        self.views.channels.len()
    }

    /// Wait until at least `n` frontend views are connected.
    pub async fn wait_for_channels(&self, n: usize) {
        let mut rx = self.views.count.subscribe();
        // The sender lives in `self.views`, so this cannot fail while `self` is borrowed.
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    /// Fire-and-forget on every view.
    pub fn call(&self, target: &str, endpoint: &str, args: Vec<Value>) {
        let invoke = Invoke::new(target, endpoint, args);
        for channel in self.views.snapshot() {
            if let Err(e) = channel.call(invoke.clone()) {
                tracing::warn!(comm_id = %channel.id(), error = %e, "Failed to send call");
            }
        }
    }

    /// Query every view and collect all answers.
    ///
    /// The first failure cancels the queries still outstanding.
    pub async fn query(
        &self,
        target: &str,
        endpoint: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, QueryError> {
        let queries = self.start(Invoke::new(target, endpoint, args))?;
        try_join_all(queries).await
    }

    /// Query every view and return the first answer; the rest are cancelled.
    pub async fn query_first(
        &self,
        target: &str,
        endpoint: &str,
        args: Vec<Value>,
    ) -> Result<Value, QueryError> {
        let queries = self.start(Invoke::new(target, endpoint, args))?;
        let (first, _, rest) = select_all(queries).await;
        drop(rest);
        first
    }

    fn start(&self, invoke: Invoke) -> Result<Vec<Query>, QueryError> {
        let channels = self.views.snapshot();
        if channels.is_empty() {
            return Err(QueryError::NothingDisplayed);
        }
        channels
            .iter()
            .map(|channel| channel.query(invoke.clone()))
            .collect()
    }
}

impl Drop for CommWidget {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(mut listener: TargetListener, manager: CommManager, views: Arc<Views>) {
    while let Ok(announce) = listener.accept().await {
        tokio::spawn(handle_announcements(announce, manager.clone(), Arc::clone(&views)));
    }
    tracing::debug!(target_name = %listener.name(), "Comm widget stopped accepting");
}

async fn handle_announcements(mut announce: Connection, manager: CommManager, views: Arc<Views>) {
    while let Some(message) = announce.incoming.recv().await {
        match serde_json::from_value::<Command>(message.data().clone()) {
            Ok(Command::Register { target }) => match manager.open_comm(&target, Value::Null) {
                Ok(connection) => {
                    let (channel, reader) = Channel::new(connection);
                    let id = channel.id();
                    tracing::info!(%target, comm_id = %id, "Frontend view connected");
                    views.add(channel);

                    let views = Arc::clone(&views);
                    tokio::spawn(async move {
                        reader.run().await;
                        views.remove(&id);
                    });
                }
                Err(e) => tracing::error!(%target, error = %e, "Failed to open channel"),
            },
            Ok(Command::Callback(_)) | Err(_) => {
                let command = message.data().get("command").cloned().unwrap_or(Value::Null);
                tracing::warn!(%command, "Unsupported command {command}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::{Action, Callback};
    use serde_json::json;
    use std::time::Duration;

    /// A hand-driven frontend view: registers a private target and handshakes.
    async fn view(frontend: &CommManager, widget: &CommWidget, name: &str) -> Connection {
        let mut private = frontend.register_target(name).unwrap();
        let announce = frontend.open_comm(widget.target(), Value::Null).unwrap();
        announce
            .comm
            .send(json!({"command": "register", "data": {"target": name}}))
            .unwrap();
        private.accept().await.unwrap()
    }

    async fn next_action(view: &mut Connection) -> Action {
        let message = tokio::time::timeout(Duration::from_secs(1), view.incoming.recv())
            .await
            .unwrap()
            .unwrap();
        Action::from_payload(message.data()).unwrap()
    }

    fn answer(view: &Connection, identifier: &str, value: Value) {
        let reply = Command::Callback(Callback::value(identifier, value));
        view.comm.send(serde_json::to_value(reply).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn query_without_views_fails() {
        let (_frontend, kernel) = CommManager::pair();
        let widget = CommWidget::new(&kernel, "m1").unwrap();
        assert_eq!(widget.target(), "m1-comm-widget");
        assert_eq!(
            widget.query("a", "b", vec![]).await,
            Err(QueryError::NothingDisplayed)
        );
    }

    #[tokio::test]
    async fn query_collects_every_view() {
        let (frontend, kernel) = CommManager::pair();
        let widget = CommWidget::new(&kernel, "m1").unwrap();
        let mut a = view(&frontend, &widget, "m1-a").await;
        let mut b = view(&frontend, &widget, "m1-b").await;
        widget.wait_for_channels(2).await;

        let query = tokio::spawn(async move { widget.query("t", "e", vec![]).await });

        for (view, value) in [(&mut a, 1), (&mut b, 2)] {
            let Action::Query { identifier, .. } = next_action(view).await else {
                panic!("expected query");
            };
            answer(view, &identifier, json!(value));
        }

        let mut values = query.await.unwrap().unwrap();
        values.sort_by_key(|v| v.as_i64());
        assert_eq!(values, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn query_first_cancels_the_rest() {
        let (frontend, kernel) = CommManager::pair();
        let widget = CommWidget::new(&kernel, "m1").unwrap();
        let mut a = view(&frontend, &widget, "m1-a").await;
        let mut b = view(&frontend, &widget, "m1-b").await;
        widget.wait_for_channels(2).await;

        let query = tokio::spawn(async move { widget.query_first("t", "e", vec![]).await });

        let Action::Query { identifier, .. } = next_action(&mut a).await else {
            panic!("expected query");
        };
        let Action::Query { identifier: other, .. } = next_action(&mut b).await else {
            panic!("expected query");
        };
        answer(&a, &identifier, json!("fast"));

        assert_eq!(query.await.unwrap(), Ok(json!("fast")));
        assert_eq!(
            next_action(&mut b).await,
            Action::Cancel { identifier: other }
        );
    }

    #[tokio::test]
    async fn call_broadcasts() {
        let (frontend, kernel) = CommManager::pair();
        let widget = CommWidget::new(&kernel, "m1").unwrap();
        let mut a = view(&frontend, &widget, "m1-a").await;
        let mut b = view(&frontend, &widget, "m1-b").await;
        widget.wait_for_channels(2).await;

        widget.call("t", "e", vec![json!(1)]);
        let expected = Action::Call(Invoke::new("t", "e", vec![json!(1)]));
        assert_eq!(next_action(&mut a).await, expected);
        assert_eq!(next_action(&mut b).await, expected);
    }

    #[tokio::test]
    async fn closed_view_is_forgotten() {
        let (frontend, kernel) = CommManager::pair();
        let widget = CommWidget::new(&kernel, "m1").unwrap();
        let a = view(&frontend, &widget, "m1-a").await;
        widget.wait_for_channels(1).await;

        a.comm.close();
        let mut count = widget.views.count.subscribe();
        tokio::time::timeout(Duration::from_secs(1), count.wait_for(|n| *n == 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(widget.channel_count(), 0);
    }
}
