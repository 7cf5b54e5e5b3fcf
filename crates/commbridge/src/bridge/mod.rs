//! Wire layer between frontend and backend.
//!
//! - **protocol**: comm frames plus the bridge's action/command payloads
//! - **codec**: JSON framing codec for AsyncRead/AsyncWrite
//! - **link**: carries comm frames between managers over a byte stream

pub mod codec;
pub mod link;
pub mod protocol;
