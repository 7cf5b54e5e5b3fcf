//! The endpoint bridge: channel setup followed by request routing.

use std::sync::Arc;

use crate::endpoint::Refs;
use crate::error::BridgeError;
use crate::error_log::ErrorLog;
use crate::host::{MessageReceiver, WidgetManager};
use crate::pending::PendingRequests;
use crate::router::Router;
use crate::setup::{BridgeConfig, establish};

/// A frontend bridge bound to its private channel.
///
/// Construction runs channel setup to completion, so no message is ever
/// dispatched before the backend has connected.
pub struct EndpointBridge {
    channel_id: String,
    router: Router,
    incoming: MessageReceiver,
}

impl EndpointBridge {
    pub async fn connect(
        manager: &dyn WidgetManager,
        config: &BridgeConfig,
        refs: Refs,
    ) -> Result<Self, BridgeError> {
        Self::connect_with_log(manager, config, refs, ErrorLog::new()).await
    }

    /// Like [`connect`](Self::connect), recording into an existing error log.
    pub async fn connect_with_log(
        manager: &dyn WidgetManager,
        config: &BridgeConfig,
        refs: Refs,
        errors: ErrorLog,
    ) -> Result<Self, BridgeError> {
        let established = match establish(manager, config).await {
            Ok(established) => established,
            Err(e) => {
                tracing::error!(error = %e, "Channel setup failed");
                errors.push(e.to_string());
                return Err(e);
            }
        };

        let connection = established.connection;
        Ok(Self {
            channel_id: established.channel_id,
            router: Router::new(refs, connection.comm, errors),
            incoming: connection.incoming,
        })
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn errors(&self) -> &ErrorLog {
        self.router.errors()
    }

    pub fn pending(&self) -> &Arc<PendingRequests> {
        self.router.pending()
    }

    /// Dispatch messages until the backend closes the channel.
    ///
    /// Handler errors are already in the error log; they never stop the loop.
    pub async fn run(mut self) {
        tracing::info!(channel_id = %self.channel_id, "Bridge running");
        while let Some(message) = self.incoming.recv().await {
            if let Err(e) = self.router.handle(&message) {
                tracing::debug!(error = %e, "Message handler returned an error");
            }
        }
        tracing::info!(
            channel_id = %self.channel_id,
            in_flight = self.router.pending().len(),
            "Channel closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{ObjectTarget, arg};
    use crate::host::{ClassicManager, CommManager};
    use serde_json::{Value, json};
    use std::time::Duration;

    #[tokio::test]
    async fn serves_queries_until_closed() {
        let (frontend, kernel) = CommManager::pair();
        let mut well_known = kernel.register_target("w").unwrap();
        let refs = Refs::new();
        refs.insert(
            "m",
            ObjectTarget::new().method("double", |args| Ok(json!(arg::<i64>(&args, 0)? * 2))),
        );

        let connect = tokio::spawn(async move {
            let manager = ClassicManager::new(frontend);
            let config = BridgeConfig::new("w").with_instance_id("1");
            EndpointBridge::connect(&manager, &config, refs).await
        });

        let mut announce = well_known.accept().await.unwrap();
        let handshake = announce.incoming.recv().await.unwrap();
        let channel = handshake.data()["data"]["target"].as_str().unwrap().to_string();
        assert_eq!(channel, "w-1");

        let mut backend = kernel.open_comm(&channel, Value::Null).unwrap();
        let bridge = connect.await.unwrap().unwrap();
        assert_eq!(bridge.channel_id(), "w-1");
        let errors = bridge.errors().clone();
        let running = tokio::spawn(bridge.run());

        backend
            .comm
            .send(json!({"action": "bogus"}))
            .unwrap();
        backend
            .comm
            .send(json!({
                "action": "query",
                "data": {"identifier": "1", "data": {"target": "m", "endpoint": "double", "args": [5]}}
            }))
            .unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(1), backend.incoming.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            reply.data(),
            &json!({"command": "callback", "data": {"value": 10, "identifier": "1"}})
        );
        assert_eq!(errors.entries(), vec!["Unsupported action bogus."]);

        backend.comm.close();
        tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .unwrap()
            .unwrap();
    }
}
