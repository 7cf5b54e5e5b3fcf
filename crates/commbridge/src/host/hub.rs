//! In-process comm manager.
//!
//! Each side of a notebook session (frontend, kernel) owns one [`CommManager`].
//! Opening a comm on one side sends `comm_open` to the other, where the
//! listener registered for the target receives a [`Connection`]. Frames leave
//! a manager through its outbound queue; [`CommManager::deliver`] applies
//! frames arriving from the peer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::bridge::protocol::{CommId, CommMessage, Frame};
use crate::error::HostError;

/// Frames a manager wants delivered to its peer.
pub type FrameReceiver = mpsc::UnboundedReceiver<Frame>;

/// Inbound messages for one comm.
pub type MessageReceiver = mpsc::UnboundedReceiver<CommMessage>;

#[derive(Default)]
struct HubState {
    targets: HashMap<String, mpsc::UnboundedSender<Connection>>,
    comms: HashMap<CommId, mpsc::UnboundedSender<CommMessage>>,
}

/// One side of a comm session.
#[derive(Clone)]
pub struct CommManager {
    state: Arc<StdMutex<HubState>>,
    outbound: mpsc::UnboundedSender<Frame>,
}

impl CommManager {
    pub fn new() -> (Self, FrameReceiver) {
        let (outbound, frames) = mpsc::unbounded_channel();
        let manager = Self {
            state: Arc::new(StdMutex::new(HubState::default())),
            outbound,
        };
        (manager, frames)
    }

    /// Two managers wired back to back, e.g. a frontend and its kernel.
    ///
    /// Spawns the forwarding tasks, so this must be called inside a tokio runtime.
    pub fn pair() -> (Self, Self) {
        let (left, left_frames) = Self::new();
        let (right, right_frames) = Self::new();
        tokio::spawn(forward(left_frames, right.clone()));
        tokio::spawn(forward(right_frames, left.clone()));
        (left, right)
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept comms the peer opens to `name`.
    pub fn register_target(&self, name: &str) -> Result<TargetListener, HostError> {
        let mut state = self.state();
        if let Some(existing) = state.targets.get(name) {
            if !existing.is_closed() {
                return Err(HostError::TargetTaken(name.to_string()));
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.targets.insert(name.to_string(), tx);
        tracing::debug!(target_name = %name, "Registered comm target");

        Ok(TargetListener {
            name: name.to_string(),
            connections: rx,
        })
    }

    pub fn unregister_target(&self, name: &str) -> bool {
        self.state().targets.remove(name).is_some()
    }

    /// Open a comm to `target` on the peer.
    pub fn open_comm(&self, target: &str, data: Value) -> Result<Connection, HostError> {
        let comm_id = CommId::new();
        let (tx, incoming) = mpsc::unbounded_channel();
        self.state().comms.insert(comm_id, tx);

        let comm = self.comm_handle(comm_id, target);
        if self
            .outbound
            .send(Frame::CommOpen {
                comm_id,
                target_name: target.to_string(),
                data,
            })
            .is_err()
        {
            self.state().comms.remove(&comm_id);
            return Err(HostError::Closed(comm_id.to_string()));
        }

        tracing::debug!(%comm_id, target_name = %target, "Opened comm");
        Ok(Connection { comm, incoming })
    }

    /// Apply a frame received from the peer.
    pub fn deliver(&self, frame: Frame) {
        match frame {
            Frame::CommOpen {
                comm_id,
                target_name,
                ..
            } => self.accept_open(comm_id, target_name),
            Frame::CommMsg { comm_id, data } => {
                let delivered = match self.state().comms.get(&comm_id) {
                    Some(tx) => tx.send(CommMessage::new(comm_id, data)).is_ok(),
                    None => false,
                };
                if !delivered {
                    tracing::warn!(%comm_id, "Dropping message for unknown comm");
                }
            }
            Frame::CommClose { comm_id } => {
                if self.state().comms.remove(&comm_id).is_some() {
                    tracing::debug!(%comm_id, "Comm closed by peer");
                }
            }
        }
    }

    fn accept_open(&self, comm_id: CommId, target_name: String) {
        let (tx, incoming) = mpsc::unbounded_channel();
        let connection = Connection {
            comm: self.comm_handle(comm_id, &target_name),
            incoming,
        };

        let mut state = self.state();
        let accepted = match state.targets.get(&target_name) {
            Some(listener) => listener.send(connection).is_ok(),
            None => false,
        };

        if accepted {
            state.comms.insert(comm_id, tx);
            tracing::debug!(%comm_id, target_name = %target_name, "Accepted comm");
        } else {
            state.targets.remove(&target_name);
            drop(state);
            tracing::error!(%comm_id, target_name = %target_name, "No such comm target registered");
            let _ = self.outbound.send(Frame::CommClose { comm_id });
        }
    }

    fn comm_handle(&self, id: CommId, target: &str) -> Comm {
        Comm {
            id,
            target_name: target.to_string(),
            outbound: self.outbound.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// Number of comms currently open on this side.
    pub fn comm_count(&self) -> usize {
        self.state().comms.len()
    }
}

async fn forward(mut frames: FrameReceiver, peer: CommManager) {
    while let Some(frame) = frames.recv().await {
        peer.deliver(frame);
    }
}

/// Sending half of a comm.
#[derive(Clone)]
pub struct Comm {
    id: CommId,
    target_name: String,
    outbound: mpsc::UnboundedSender<Frame>,
    state: Arc<StdMutex<HubState>>,
}

impl Comm {
    pub fn id(&self) -> CommId {
        self.id
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn send(&self, data: Value) -> Result<(), HostError> {
        self.outbound
            .send(Frame::CommMsg {
                comm_id: self.id,
                data,
            })
            .map_err(|_| HostError::Closed(self.id.to_string()))
    }

    /// Close the comm on both sides. Ends the local `incoming` stream.
    pub fn close(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .comms
            .remove(&self.id);
        let _ = self.outbound.send(Frame::CommClose { comm_id: self.id });
    }
}

impl std::fmt::Debug for Comm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Comm")
            .field("id", &self.id)
            .field("target_name", &self.target_name)
            .finish()
    }
}

/// A comm together with the stream of messages the peer sends on it.
#[derive(Debug)]
pub struct Connection {
    pub comm: Comm,
    pub incoming: MessageReceiver,
}

/// Receives the comms the peer opens to a registered target.
#[derive(Debug)]
pub struct TargetListener {
    name: String,
    connections: mpsc::UnboundedReceiver<Connection>,
}

impl TargetListener {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the next comm opened to this target.
    pub async fn accept(&mut self) -> Result<Connection, HostError> {
        self.connections
            .recv()
            .await
            .ok_or_else(|| HostError::TargetDropped(self.name.clone()))
    }
}
