//! Widget manager variants.
//!
//! The bridge only needs three things from its host: a readiness wait, the
//! ability to register a comm target, and the ability to open a comm. The lab
//! variant gates on document and session readiness; the classic variant is
//! ready as soon as it exists.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use super::hub::{Comm, CommManager, TargetListener};
use crate::error::HostError;

/// Host capabilities consumed by channel setup.
#[async_trait]
pub trait WidgetManager: Send + Sync {
    /// Resolve once the host can register targets and open comms.
    async fn ready(&self) -> Result<(), HostError>;

    fn register_target(&self, name: &str) -> Result<TargetListener, HostError>;

    fn open_comm(&self, target: &str) -> Result<Comm, HostError>;
}

/// Sets a [`Readiness`] flag. Dropping it before [`ReadySignal::set_ready`] fails waiters.
#[derive(Debug)]
pub struct ReadySignal {
    tx: watch::Sender<bool>,
}

impl ReadySignal {
    pub fn set_ready(&self) {
        self.tx.send_replace(true);
    }
}

/// A one-way "ready" flag observed by widget managers.
#[derive(Debug, Clone)]
pub struct Readiness {
    name: &'static str,
    rx: watch::Receiver<bool>,
}

impl Readiness {
    pub fn new(name: &'static str) -> (ReadySignal, Self) {
        let (tx, rx) = watch::channel(false);
        (ReadySignal { tx }, Self { name, rx })
    }

    /// Already ready, for hosts that have nothing to wait on.
    pub fn ready(name: &'static str) -> Self {
        let (_, rx) = watch::channel(true);
        Self { name, rx }
    }

    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn wait(&self) -> Result<(), HostError> {
        let mut rx = self.rx.clone();
        rx.wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|_| HostError::NotReady(self.name))
    }
}

/// Notebook application host: a document context with a session whose kernel
/// carries the comm manager.
pub struct LabManager {
    context: Readiness,
    session: Readiness,
    kernel: CommManager,
}

impl LabManager {
    pub fn new(context: Readiness, session: Readiness, kernel: CommManager) -> Self {
        Self {
            context,
            session,
            kernel,
        }
    }
}

#[async_trait]
impl WidgetManager for LabManager {
    async fn ready(&self) -> Result<(), HostError> {
        self.context.wait().await?;
        tracing::trace!("Document context ready");
        self.session.wait().await?;
        tracing::trace!("Session context ready");
        Ok(())
    }

    fn register_target(&self, name: &str) -> Result<TargetListener, HostError> {
        self.kernel.register_target(name)
    }

    fn open_comm(&self, target: &str) -> Result<Comm, HostError> {
        Ok(self.kernel.open_comm(target, Value::Null)?.comm)
    }
}

/// Classic notebook host: the comm manager is usable immediately.
pub struct ClassicManager {
    comm_manager: CommManager,
}

impl ClassicManager {
    pub fn new(comm_manager: CommManager) -> Self {
        Self { comm_manager }
    }
}

#[async_trait]
impl WidgetManager for ClassicManager {
    async fn ready(&self) -> Result<(), HostError> {
        Ok(())
    }

    fn register_target(&self, name: &str) -> Result<TargetListener, HostError> {
        self.comm_manager.register_target(name)
    }

    fn open_comm(&self, target: &str) -> Result<Comm, HostError> {
        Ok(self.comm_manager.open_comm(target, Value::Null)?.comm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn lab_waits_for_context_then_session() {
        let (context_signal, context) = Readiness::new("document context");
        let (session_signal, session) = Readiness::new("session context");
        let (kernel, _frames) = CommManager::new();
        let manager = LabManager::new(context, session, kernel);

        let ready = manager.ready();
        tokio::pin!(ready);

        assert!(
            tokio::time::timeout(Duration::from_millis(20), &mut ready)
                .await
                .is_err()
        );
        session_signal.set_ready();
        assert!(
            tokio::time::timeout(Duration::from_millis(20), &mut ready)
                .await
                .is_err()
        );
        context_signal.set_ready();
        assert_eq!(ready.await, Ok(()));
    }

    #[tokio::test]
    async fn dropped_signal_is_not_ready() {
        let (signal, context) = Readiness::new("document context");
        let manager = LabManager::new(
            context,
            Readiness::ready("session context"),
            CommManager::new().0,
        );
        drop(signal);
        assert_eq!(
            manager.ready().await,
            Err(HostError::NotReady("document context"))
        );
    }

    #[tokio::test]
    async fn classic_is_immediately_ready() {
        let manager = ClassicManager::new(CommManager::new().0);
        assert_eq!(manager.ready().await, Ok(()));
    }

    #[test]
    fn readiness_flag() {
        let (signal, readiness) = Readiness::new("context");
        assert!(!readiness.is_ready());
        signal.set_ready();
        assert!(readiness.is_ready());
        assert!(Readiness::ready("context").is_ready());
    }
}
