//! Framed JSON codec for comm frames on a byte stream.
//!
//! A 4-byte big-endian length prefix (LengthDelimitedCodec) followed by a
//! serde_json body. Works over any AsyncRead/AsyncWrite.

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Frames larger than this are rejected unless configured otherwise.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Length-prefixed JSON codec for a single message type.
pub struct JsonCodec<T> {
    inner: LengthDelimitedCodec,
    _phantom: PhantomData<T>,
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .max_frame_length(max_frame_length)
                .new_codec(),
            _phantom: PhantomData,
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.inner.max_frame_length()
    }
}

impl<T: DeserializeOwned> Decoder for JsonCodec<T> {
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(bytes) = self.inner.decode(src)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl<T: Serialize> Encoder<T> for JsonCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json =
            serde_json::to_vec(&item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::trace!(frame_bytes = json.len(), "Encoding frame");
        self.inner.encode(Bytes::from(json), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::{CommId, Frame};
    use serde_json::json;

    #[test]
    fn decodes_what_it_encodes() {
        let mut codec = JsonCodec::<Frame>::new();
        let mut buf = BytesMut::new();

        let frame = Frame::CommMsg {
            comm_id: CommId::new(),
            data: json!({"action": "call", "data": {"target": "m", "endpoint": "reset"}}),
        };
        codec.encode(frame.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(frame));
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let mut codec = JsonCodec::<Frame>::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Frame::CommClose { comm_id: CommId::new() }, &mut buf)
            .unwrap();

        let mut partial = buf.split_to(buf.len() - 3);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn invalid_json_is_invalid_data() {
        let mut codec = JsonCodec::<Frame>::new();
        let mut raw = LengthDelimitedCodec::builder()
            .length_field_length(4)
            .new_codec();
        let mut buf = BytesMut::new();
        raw.encode(Bytes::from_static(b"{\"msg_type\": \"comm_poke\"}"), &mut buf)
            .unwrap();

        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut codec = JsonCodec::<Frame>::with_max_frame_length(16);
        assert_eq!(codec.max_frame_length(), 16);

        let mut buf = BytesMut::new();
        let frame = Frame::CommMsg {
            comm_id: CommId::new(),
            data: json!("this payload is far longer than sixteen bytes"),
        };
        assert!(codec.encode(frame, &mut buf).is_err());
    }
}
