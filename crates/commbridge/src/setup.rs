//! Channel setup: negotiate the private per-instance channel.
//!
//! Order matters and is not negotiable with the host:
//! readiness, register private target, `register` handshake, first connection.

use crate::bridge::protocol::Command;
use crate::error::BridgeError;
use crate::host::{Comm, Connection, WidgetManager};

const SUFFIX_LEN: usize = 8;
const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// How the channel identifier's suffix is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSuffix {
    /// Fresh random token per bridge.
    Random,
    /// Caller-supplied instance id.
    Instance(String),
}

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Well-known target the backend listens on.
    pub target: String,
    pub suffix: ChannelSuffix,
}

impl BridgeConfig {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            suffix: ChannelSuffix::Random,
        }
    }

    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.suffix = ChannelSuffix::Instance(id.into());
        self
    }

    /// Derive `{target}-{suffix}`. Random suffixes differ per call.
    pub fn channel_id(&self) -> String {
        match &self.suffix {
            ChannelSuffix::Random => format!("{}-{}", self.target, random_token()),
            ChannelSuffix::Instance(id) => format!("{}-{}", self.target, id),
        }
    }
}

/// Eight lowercase base36 characters.
pub fn random_token() -> String {
    let mut n = uuid::Uuid::new_v4().as_u128();
    let mut token = String::with_capacity(SUFFIX_LEN);
    for _ in 0..SUFFIX_LEN {
        token.push(ALPHABET[(n % 36) as usize] as char);
        n /= 36;
    }
    token
}

/// Result of a completed setup.
#[derive(Debug)]
pub struct Established {
    pub channel_id: String,
    /// The private channel; the only one the router ever uses.
    pub connection: Connection,
    /// Comm to the well-known target that carried the handshake.
    pub announce: Comm,
}

/// Run channel setup against `manager`.
///
/// Never times out; a host that never connects leaves this pending.
pub async fn establish(
    manager: &dyn WidgetManager,
    config: &BridgeConfig,
) -> Result<Established, BridgeError> {
    manager.ready().await?;

    let channel_id = config.channel_id();
    let mut listener = manager.register_target(&channel_id)?;

    let announce = manager.open_comm(&config.target)?;
    let handshake = serde_json::to_value(Command::Register {
        target: channel_id.clone(),
    })
    .map_err(|e| BridgeError::malformed("register", e))?;
    announce.send(handshake)?;
    tracing::info!(%channel_id, well_known = %config.target, "Sent register handshake");

    let connection = listener.accept().await?;
    tracing::info!(%channel_id, comm_id = %connection.comm.id(), "Backend connected");

    Ok(Established {
        channel_id,
        connection,
        announce,
    })
}
