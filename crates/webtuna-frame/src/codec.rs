use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};
use crate::stream::StreamId;

/// Envelope header: magic (2) + length (4) = 6 bytes.
pub const HEADER_SIZE: usize = 6;

/// Body header: kind (1) + stream id (4) = 5 bytes.
pub const BODY_HEADER_SIZE: usize = 5;

/// Magic bytes: "WT" (0x57 0x54).
pub const MAGIC: [u8; 2] = [0x57, 0x54];

/// Default maximum body size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Body kind: payload bytes for a stream.
pub const KIND_DATA: u8 = 0x01;

/// Body kind: end of stream.
pub const KIND_END: u8 = 0x02;

/// One multiplexed unit on a Channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Payload bytes for a stream.
    Data { id: StreamId, payload: Bytes },
    /// End of stream for an id.
    Close { id: StreamId },
}

impl Frame {
    /// Create a data frame.
    ///
    /// An empty payload is legal on the wire and is read back as [`Frame::Close`].
    pub fn data(id: StreamId, payload: impl Into<Bytes>) -> Self {
        Self::Data {
            id,
            payload: payload.into(),
        }
    }

    /// Create an end-of-stream frame.
    pub fn close(id: StreamId) -> Self {
        Self::Close { id }
    }

    /// The stream this frame belongs to.
    pub fn id(&self) -> StreamId {
        match self {
            Frame::Data { id, .. } | Frame::Close { id } => *id,
        }
    }

    /// Size of the encoded body (kind + id + payload).
    pub fn body_len(&self) -> usize {
        match self {
            Frame::Data { payload, .. } => BODY_HEADER_SIZE + payload.len(),
            Frame::Close { .. } => BODY_HEADER_SIZE,
        }
    }

    /// The total wire size of this frame (envelope header + body).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.body_len()
    }

    /// Decode a frame from an envelope body.
    ///
    /// A zero-length data payload means end of stream.
    pub fn parse(mut body: Bytes) -> Result<Self> {
        if body.len() < BODY_HEADER_SIZE {
            return Err(FrameError::Malformed("body shorter than frame header"));
        }

        let kind = body.get_u8();
        let id = body.get_u32_le();

        match kind {
            KIND_DATA if body.is_empty() => Ok(Frame::Close { id }),
            KIND_DATA => Ok(Frame::Data { id, payload: body }),
            KIND_END if body.is_empty() => Ok(Frame::Close { id }),
            KIND_END => Err(FrameError::Malformed("end-of-stream frame carries a payload")),
            _ => Err(FrameError::Malformed("unknown frame kind")),
        }
    }
}

/// The raw body of one envelope, before it is interpreted as a [`Frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub body: Bytes,
}

impl Envelope {
    /// Interpret the body as a frame.
    pub fn frame(&self) -> Result<Frame> {
        Frame::parse(self.body.clone())
    }
}

impl From<Envelope> for Bytes {
    fn from(envelope: Envelope) -> Self {
        envelope.body
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬───────────┬──────────┬────────────┬─────────────────┐
/// │ Magic (2B)   │ Length    │ Kind     │ Stream id  │ Payload         │
/// │ 0x57 0x54    │ (4B LE)   │ (1B)     │ (4B LE)    │ (Length-5 bytes)│
/// │ "WT"         │           │          │            │                 │
/// └──────────────┴───────────┴──────────┴────────────┴─────────────────┘
/// ```
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    let body_len = frame.body_len();
    if body_len > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: body_len,
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + body_len);
    dst.put_slice(&MAGIC);
    dst.put_u32_le(body_len as u32);
    match frame {
        Frame::Data { id, payload } => {
            dst.put_u8(KIND_DATA);
            dst.put_u32_le(*id);
            dst.put_slice(payload);
        }
        Frame::Close { id } => {
            dst.put_u8(KIND_END);
            dst.put_u32_le(*id);
        }
    }
    Ok(())
}

/// Decode one envelope from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete envelope yet.
/// On success, consumes the envelope bytes from the buffer.
pub fn decode_envelope(src: &mut BytesMut, max_payload: usize) -> Result<Option<Envelope>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }

    let body_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;

    if body_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: body_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + body_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let body = src.split_to(body_len).freeze();

    Ok(Some(Envelope { body }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum body size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// `tokio_util` codec for webtuna Channels.
///
/// Decodes [`Envelope`]s so that a malformed body can be dropped without
/// tearing down the framed stream; encodes [`Frame`]s.
#[derive(Debug, Clone, Default)]
pub struct TunaCodec {
    config: FrameConfig,
}

impl TunaCodec {
    /// Create a codec with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self { config }
    }

    /// Update maximum body size for subsequent encoding and decoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current codec configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Decoder for TunaCodec {
    type Item = Envelope;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>> {
        decode_envelope(src, self.config.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>> {
        match self.decode(src)? {
            Some(envelope) => Ok(Some(envelope)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Frame> for TunaCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        let body_len = frame.body_len();
        if body_len > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: body_len,
                max: self.config.max_payload_size,
            });
        }
        encode_frame(&frame, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    fn decode_one(buf: &mut BytesMut) -> Frame {
        decode_envelope(buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap()
            .frame()
            .unwrap()
    }

    #[test]
    fn test_encode_decode_data() {
        let mut buf = BytesMut::new();
        let frame = Frame::data(7, Bytes::from_static(b"hello, webtuna!"));

        encode_frame(&frame, &mut buf).unwrap();
        assert_eq!(buf.len(), frame.wire_size());

        assert_eq!(decode_one(&mut buf), frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_close_frame_has_no_payload() {
        let mut buf = BytesMut::new();
        encode_frame(&Frame::close(3), &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + BODY_HEADER_SIZE);
        assert_eq!(decode_one(&mut buf), Frame::Close { id: 3 });
    }

    #[test]
    fn test_empty_data_payload_reads_as_close() {
        let mut buf = BytesMut::new();
        encode_frame(&Frame::data(9, Bytes::new()), &mut buf).unwrap();
        assert_eq!(decode_one(&mut buf), Frame::Close { id: 9 });
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut buf = BytesMut::from(&[0x57, 0x54, 0x00][..]);
        let result = decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_decode_incomplete_body() {
        let mut buf = BytesMut::new();
        encode_frame(&Frame::data(1, Bytes::from_static(b"hello")), &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2);

        let result = decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_decode_invalid_magic() {
        let mut buf = BytesMut::from(&[0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00][..]);
        let result = decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::InvalidMagic)));
    }

    #[test]
    fn test_decode_payload_too_large() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(1024 * 1024 * 32);

        let result = decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_multiple_frames_interleaved_ids() {
        let mut buf = BytesMut::new();
        encode_frame(&Frame::data(1, Bytes::from_static(b"first")), &mut buf).unwrap();
        encode_frame(&Frame::data(2, Bytes::from_static(b"second")), &mut buf).unwrap();
        encode_frame(&Frame::close(1), &mut buf).unwrap();

        assert_eq!(decode_one(&mut buf), Frame::data(1, Bytes::from_static(b"first")));
        assert_eq!(decode_one(&mut buf), Frame::data(2, Bytes::from_static(b"second")));
        assert_eq!(decode_one(&mut buf), Frame::close(1));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_malformed_bodies_are_recoverable() {
        let short = Frame::parse(Bytes::from_static(&[KIND_DATA, 0x01]));
        assert!(matches!(short, Err(FrameError::Malformed(_))));

        let unknown = Frame::parse(Bytes::from_static(&[0x7F, 1, 0, 0, 0, b'x']));
        assert!(matches!(unknown, Err(FrameError::Malformed(_))));

        let end_with_payload = Frame::parse(Bytes::from_static(&[KIND_END, 1, 0, 0, 0, b'x']));
        let err = end_with_payload.unwrap_err();
        assert!(err.is_recoverable());
        assert!(!FrameError::InvalidMagic.is_recoverable());
    }

    #[test]
    fn test_frame_id_and_wire_size() {
        let frame = Frame::data(5, Bytes::from_static(b"test"));
        assert_eq!(frame.id(), 5);
        assert_eq!(frame.wire_size(), HEADER_SIZE + BODY_HEADER_SIZE + 4);
        assert_eq!(Frame::close(6).id(), 6);
    }

    #[test]
    fn test_codec_rejects_oversized_frame_on_encode() {
        let mut codec = TunaCodec::with_config(FrameConfig {
            max_payload_size: 8,
        });
        let mut dst = BytesMut::new();
        let err = codec
            .encode(Frame::data(1, Bytes::from_static(b"oversized")), &mut dst)
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(dst.is_empty());
    }

    #[test]
    fn test_codec_eof_mid_envelope() {
        let mut codec = TunaCodec::default();
        let mut buf = BytesMut::from(&MAGIC[..]);
        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));

        let mut empty = BytesMut::new();
        assert!(codec.decode_eof(&mut empty).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_framed_roundtrip_over_duplex() {
        let (left, right) = tokio::io::duplex(64);
        let mut writer = FramedWrite::new(left, TunaCodec::default());
        let mut reader = FramedRead::new(right, TunaCodec::default());

        let sender = tokio::spawn(async move {
            for i in 0..16u32 {
                let payload = format!("msg-{i}");
                writer
                    .send(Frame::data(i % 3 + 1, Bytes::from(payload)))
                    .await
                    .unwrap();
            }
            writer.send(Frame::close(2)).await.unwrap();
        });

        for i in 0..16u32 {
            let frame = reader.next().await.unwrap().unwrap().frame().unwrap();
            assert_eq!(frame.id(), i % 3 + 1);
            assert_eq!(frame, Frame::data(i % 3 + 1, Bytes::from(format!("msg-{i}"))));
        }
        let last = reader.next().await.unwrap().unwrap().frame().unwrap();
        assert_eq!(last, Frame::close(2));

        sender.await.unwrap();
        assert!(reader.next().await.is_none());
    }
}
