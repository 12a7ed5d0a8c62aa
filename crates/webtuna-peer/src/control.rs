use serde::{Deserialize, Serialize};
use webtuna_frame::{Envelope, Frame, CONTROL};

use crate::error::{PeerError, Result};

/// What a connection to the relay wants to do.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Register a key and wait for connecting peers.
    Share,
    /// Reach the peer sharing a key.
    Connect,
    /// Answer one `incoming` notice with a fresh connection.
    Attach,
}

/// CONTROL stream message exchanged with the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    Hello {
        protocol: String,
        version: String,
        role: Role,
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ticket: Option<u64>,
    },
    Welcome {
        session: String,
    },
    Rejected {
        reason: String,
    },
    Incoming {
        ticket: u64,
    },
    Ping,
    Pong,
}

impl RelayMessage {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Wrap this message in a CONTROL frame.
    pub fn to_frame(&self) -> Result<Frame> {
        Ok(Frame::data(CONTROL, serde_json::to_vec(self)?))
    }

    /// Read a message out of a received envelope.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        match envelope.frame()? {
            Frame::Data { id: CONTROL, payload } => Ok(serde_json::from_slice(&payload)?),
            other => Err(PeerError::HandshakeFailed(format!(
                "unexpected frame on stream {} during relay exchange",
                other.id()
            ))),
        }
    }

    /// Message type name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayMessage::Hello { .. } => "hello",
            RelayMessage::Welcome { .. } => "welcome",
            RelayMessage::Rejected { .. } => "rejected",
            RelayMessage::Incoming { .. } => "incoming",
            RelayMessage::Ping => "ping",
            RelayMessage::Pong => "pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use webtuna_frame::{decode_envelope, encode_frame, DEFAULT_MAX_PAYLOAD};

    use super::*;

    fn through_wire(msg: &RelayMessage) -> Envelope {
        let mut buf = BytesMut::new();
        encode_frame(&msg.to_frame().unwrap(), &mut buf).unwrap();
        decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn hello_serializes_with_type_tag() {
        let hello = RelayMessage::Hello {
            protocol: "webtuna".to_string(),
            version: "1.0".to_string(),
            role: Role::Connect,
            key: "abc".to_string(),
            ticket: None,
        };
        let json = serde_json::to_value(&hello).unwrap();
        assert_eq!(json["type"], "hello");
        assert_eq!(json["role"], "connect");
        assert!(json.get("ticket").is_none());
    }

    #[test]
    fn unit_messages_carry_only_type() {
        let json = serde_json::to_string(&RelayMessage::Ping).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }

    #[test]
    fn message_survives_control_frame() {
        let msg = RelayMessage::Incoming { ticket: 42 };
        let parsed = RelayMessage::from_envelope(&through_wire(&msg)).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.kind(), "incoming");
    }

    #[test]
    fn non_control_frame_is_rejected() {
        let mut buf = BytesMut::new();
        encode_frame(&Frame::data(3, &b"{}"[..]), &mut buf).unwrap();
        let envelope = decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        let err = RelayMessage::from_envelope(&envelope).unwrap_err();
        assert!(matches!(err, PeerError::HandshakeFailed(_)));
    }
}
