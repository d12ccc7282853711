//! Relay envelope codec.
//!
//! Every relay message is a JSON object `{type, ...}`. The negotiation and
//! file-control types are decoded into typed variants; any other `type` is
//! carried through untouched as an application payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::engine::{IceCandidateInit, SdpKind, SessionDescription};

/// Announcement that a file transfer is starting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// Transfer id.
    pub id: u64,
    /// File name (no directory components on the sending side).
    pub name: String,
    /// Total size in bytes.
    pub size: u64,
    /// MIME type.
    pub file_type: String,
}

/// A decoded relay message.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingMessage {
    /// Remote offer.
    Offer(SessionDescription),
    /// Remote answer.
    Answer(SessionDescription),
    /// Trickled ICE candidate.
    Candidate(IceCandidateInit),
    /// File transfer announcement.
    FileInfo(FileInfo),
    /// File transfer completion.
    FileComplete {
        /// Transfer id.
        id: u64,
    },
    /// Any other `type`, passed through verbatim.
    Application(Value),
}

/// Wire representation of the typed envelopes.
#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum Envelope {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: IceCandidateInit },
    FileInfo(FileInfo),
    FileComplete { id: u64 },
}

const TYPED: &[&str] = &["offer", "answer", "candidate", "file-info", "file-complete"];

/// Why an inbound message could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Frame bytes were not UTF-8.
    NotUtf8,
    /// Text was not a JSON object with a string `type`.
    NotEnvelope(String),
    /// A known `type` had missing or mistyped fields.
    Malformed {
        /// The envelope type.
        kind: String,
        /// Parser message.
        reason: String,
    },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotUtf8 => write!(f, "frame is not valid UTF-8"),
            Self::NotEnvelope(reason) => write!(f, "not a relay envelope: {reason}"),
            Self::Malformed { kind, reason } => write!(f, "malformed '{kind}' message: {reason}"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl SignalingMessage {
    /// Envelope `type` string.
    pub fn kind(&self) -> &str {
        match self {
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::Candidate(_) => "candidate",
            Self::FileInfo(_) => "file-info",
            Self::FileComplete { .. } => "file-complete",
            Self::Application(value) => value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("application"),
        }
    }

    /// Wrap a session description in its matching envelope.
    pub fn description(desc: SessionDescription) -> Self {
        match desc.kind {
            SdpKind::Offer => Self::Offer(desc),
            SdpKind::Answer => Self::Answer(desc),
        }
    }

    /// Serialize to the JSON wire text.
    pub fn encode(&self) -> String {
        let envelope = match self {
            Self::Offer(desc) => Envelope::Offer {
                sdp: desc.sdp.clone(),
            },
            Self::Answer(desc) => Envelope::Answer {
                sdp: desc.sdp.clone(),
            },
            Self::Candidate(candidate) => Envelope::Candidate {
                candidate: candidate.clone(),
            },
            Self::FileInfo(info) => Envelope::FileInfo(info.clone()),
            Self::FileComplete { id } => Envelope::FileComplete { id: *id },
            Self::Application(value) => return value.to_string(),
        };
        // Envelope holds only strings and integers
        serde_json::to_string(&envelope).unwrap_or_default()
    }

    /// Decode from raw frame bytes (text or binary-encoded text).
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::NotUtf8)?;
        Self::decode(text)
    }

    /// Decode from JSON text.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| DecodeError::NotEnvelope(e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| DecodeError::NotEnvelope("missing string 'type'".to_string()))?
            .to_string();

        if !TYPED.contains(&kind.as_str()) {
            return Ok(Self::Application(value));
        }

        let envelope: Envelope = serde_json::from_value(value).map_err(|e| DecodeError::Malformed {
            kind: kind.clone(),
            reason: e.to_string(),
        })?;

        Ok(match envelope {
            Envelope::Offer { sdp } => Self::Offer(SessionDescription::offer(sdp)),
            Envelope::Answer { sdp } => Self::Answer(SessionDescription::answer(sdp)),
            Envelope::Candidate { candidate } => Self::Candidate(candidate),
            Envelope::FileInfo(info) => Self::FileInfo(info),
            Envelope::FileComplete { id } => Self::FileComplete { id },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_offer_wire_format() {
        let msg = SignalingMessage::Offer(SessionDescription::offer("v=0\r\n"));
        let value: Value = serde_json::from_str(&msg.encode()).unwrap();
        assert_eq!(value, json!({"type": "offer", "sdp": "v=0\r\n"}));
    }

    #[test]
    fn test_candidate_wire_format_nests_descriptor() {
        let msg = SignalingMessage::Candidate(IceCandidateInit {
            candidate: "candidate:1 1 udp 2122260223 192.168.1.2 54321 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        });
        let value: Value = serde_json::from_str(&msg.encode()).unwrap();
        assert_eq!(value["type"], "candidate");
        assert_eq!(value["candidate"]["sdpMid"], "0");
        assert_eq!(value["candidate"]["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_file_info_uses_camel_case_file_type() {
        let msg = SignalingMessage::FileInfo(FileInfo {
            id: 1_700_000_000_000,
            name: "a.bin".to_string(),
            size: 50_000,
            file_type: "application/octet-stream".to_string(),
        });
        let value: Value = serde_json::from_str(&msg.encode()).unwrap();
        assert_eq!(value["type"], "file-info");
        assert_eq!(value["fileType"], "application/octet-stream");
        assert_eq!(value["size"], 50_000);
    }

    #[test]
    fn test_decode_browser_answer() {
        let msg = SignalingMessage::decode(r#"{"type":"answer","sdp":"v=0"}"#).unwrap();
        assert_eq!(msg, SignalingMessage::Answer(SessionDescription::answer("v=0")));
    }

    #[test]
    fn test_decode_file_complete() {
        let msg = SignalingMessage::decode(r#"{"type":"file-complete","id":42}"#).unwrap();
        assert_eq!(msg, SignalingMessage::FileComplete { id: 42 });
    }

    #[test]
    fn test_unknown_type_is_application_payload() {
        let msg = SignalingMessage::decode(r#"{"type":"ping","timestamp":5}"#).unwrap();
        assert_eq!(msg.kind(), "ping");
        assert!(matches!(msg, SignalingMessage::Application(ref v) if v["timestamp"] == 5));
        assert_eq!(msg.encode(), r#"{"timestamp":5,"type":"ping"}"#);
    }

    #[test]
    fn test_known_type_with_bad_fields_is_malformed() {
        let err = SignalingMessage::decode(r#"{"type":"offer"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { ref kind, .. } if kind == "offer"));
    }

    #[test]
    fn test_rejects_non_envelopes() {
        assert!(matches!(
            SignalingMessage::decode("hello"),
            Err(DecodeError::NotEnvelope(_))
        ));
        assert!(matches!(
            SignalingMessage::decode(r#"{"sdp":"v=0"}"#),
            Err(DecodeError::NotEnvelope(_))
        ));
        assert_eq!(
            SignalingMessage::decode_bytes(&[0xff, 0xfe]),
            Err(DecodeError::NotUtf8)
        );
    }

    #[test]
    fn test_decode_binary_encoded_text() {
        let bytes = br#"{"type":"candidate","candidate":{"candidate":"candidate:x"}}"#;
        let msg = SignalingMessage::decode_bytes(bytes).unwrap();
        assert!(matches!(msg, SignalingMessage::Candidate(ref c) if c.sdp_mid.is_none()));
    }
}
