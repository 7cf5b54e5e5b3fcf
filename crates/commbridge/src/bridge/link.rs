//! Comm frames over a byte stream.
//!
//! Lets a [`CommManager`] talk to a peer manager in another process: outbound
//! frames are encoded onto `writer`, frames decoded from `reader` are delivered
//! to the manager.

use std::io;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use super::codec::{DEFAULT_MAX_FRAME_LENGTH, JsonCodec};
use super::protocol::Frame;
use crate::host::{CommManager, FrameReceiver};

/// Link configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub max_frame_length: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl LinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_frame_length = max_frame_length;
        self
    }
}

/// Pump frames between `manager` and the stream until either side closes.
pub async fn serve<R, W>(
    manager: CommManager,
    frames: FrameReceiver,
    reader: R,
    writer: W,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    serve_with_config(manager, frames, reader, writer, &LinkConfig::default()).await
}

pub async fn serve_with_config<R, W>(
    manager: CommManager,
    mut frames: FrameReceiver,
    reader: R,
    writer: W,
    config: &LinkConfig,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = FramedRead::new(
        reader,
        JsonCodec::<Frame>::with_max_frame_length(config.max_frame_length),
    );
    let mut writer = FramedWrite::new(
        writer,
        JsonCodec::<Frame>::with_max_frame_length(config.max_frame_length),
    );

    loop {
        tokio::select! {
            inbound = reader.next() => {
                match inbound {
                    Some(Ok(frame)) => {
                        tracing::trace!(?frame, "Inbound frame");
                        manager.deliver(frame);
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Link read error");
                        return Err(e);
                    }
                    None => {
                        tracing::info!("Peer closed the link");
                        return Ok(());
                    }
                }
            }

            outbound = frames.recv() => {
                let Some(frame) = outbound else {
                    tracing::debug!("Manager dropped, closing link");
                    writer.close().await?;
                    return Ok(());
                };
                writer.send(frame).await.inspect_err(|e| {
                    tracing::error!(error = %e, "Link write error");
                })?;
            }
        }
    }
}
