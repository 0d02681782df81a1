//! The wire envelope exchanged with clients.
//!
//! Every frame in either direction is one JSON object with a `type` tag,
//! the conversation's `session_id`, a `content` string, and a millisecond
//! `timestamp`. Kind-specific fields are optional and omitted when absent.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::collaborators::SynthesizedAudio;
use crate::errors::{ErrorCode, ProtocolError};
use crate::ids::ConversationId;

/// Envelope `type` tag.
///
/// Unrecognised tags decode into [`MessageKind::Unknown`] so the dispatcher
/// can log and ignore them instead of failing the frame.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    // Inbound
    /// A user utterance to answer.
    UserMessage,
    /// Request for the greeting.
    GetWelcome,
    /// Request for the conversation history.
    GetHistory,
    /// Cancel the in-flight answer.
    Stop,
    /// Client keepalive.
    Heartbeat,
    // Outbound
    /// Greeting text and audio.
    Welcome,
    /// One streamed text delta.
    AiTextChunk,
    /// The full answer text.
    AiTextComplete,
    /// Synthesized audio for the answer.
    AudioData,
    /// Serialized history.
    HistoryData,
    /// A user-visible failure.
    Error,
    /// Acknowledges `stop`.
    StopAck,
    /// Acknowledges `heartbeat`.
    HeartbeatAck,
    /// Any other tag, kept verbatim.
    Unknown(String),
}

impl MessageKind {
    /// Wire value of the tag.
    pub fn as_str(&self) -> &str {
        match self {
            Self::UserMessage => "user_message",
            Self::GetWelcome => "get_welcome",
            Self::GetHistory => "get_history",
            Self::Stop => "stop",
            Self::Heartbeat => "heartbeat",
            Self::Welcome => "welcome",
            Self::AiTextChunk => "ai_text_chunk",
            Self::AiTextComplete => "ai_text_complete",
            Self::AudioData => "audio_data",
            Self::HistoryData => "history_data",
            Self::Error => "error",
            Self::StopAck => "stop_ack",
            Self::HeartbeatAck => "heartbeat_ack",
            Self::Unknown(raw) => raw,
        }
    }

    /// Whether clients are expected to send this kind.
    pub fn is_inbound(&self) -> bool {
        matches!(
            self,
            Self::UserMessage | Self::GetWelcome | Self::GetHistory | Self::Stop | Self::Heartbeat
        )
    }
}

impl From<String> for MessageKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "user_message" => Self::UserMessage,
            "get_welcome" => Self::GetWelcome,
            "get_history" => Self::GetHistory,
            "stop" => Self::Stop,
            "heartbeat" => Self::Heartbeat,
            "welcome" => Self::Welcome,
            "ai_text_chunk" => Self::AiTextChunk,
            "ai_text_complete" => Self::AiTextComplete,
            "audio_data" => Self::AudioData,
            "history_data" => Self::HistoryData,
            "error" => Self::Error,
            "stop_ack" => Self::StopAck,
            "heartbeat_ack" => Self::HeartbeatAck,
            _ => Self::Unknown(raw),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Unknown(raw) => raw,
            other => other.as_str().to_owned(),
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One protocol frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Frame kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Conversation id; empty when the frame is not tied to one.
    #[serde(default)]
    pub session_id: String,
    /// Primary text payload.
    #[serde(default)]
    pub content: String,
    /// Creation time, Unix epoch milliseconds.
    #[serde(default)]
    pub timestamp: i64,
    /// Base64-encoded audio.
    #[serde(rename = "audioBase64", default, skip_serializing_if = "Option::is_none")]
    pub audio_base64: Option<String>,
    /// Audio duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    /// Accumulated answer text.
    #[serde(rename = "fullText", default, skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,
    /// Stable error code.
    #[serde(rename = "errorCode", default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Human-readable error message.
    #[serde(rename = "errorMsg", default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

impl Envelope {
    /// Bare envelope of `kind` stamped with the current time.
    pub fn new(kind: MessageKind, session_id: impl Into<String>) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            content: String::new(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            audio_base64: None,
            duration: None,
            full_text: None,
            error_code: None,
            error_msg: None,
        }
    }

    /// Set the text payload.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    fn with_audio(mut self, audio: &SynthesizedAudio) -> Self {
        self.audio_base64 = Some(BASE64.encode(&audio.bytes));
        self.duration = Some(audio.duration_ms);
        self
    }

    /// `ai_text_chunk` carrying one streamed delta.
    pub fn text_chunk(session_id: &ConversationId, chunk: impl Into<String>) -> Self {
        Self::new(MessageKind::AiTextChunk, session_id.as_str()).with_content(chunk)
    }

    /// `ai_text_complete` carrying the whole transcript.
    pub fn text_complete(session_id: &ConversationId, full_text: impl Into<String>) -> Self {
        let mut env = Self::new(MessageKind::AiTextComplete, session_id.as_str());
        env.full_text = Some(full_text.into());
        env
    }

    /// `audio_data` for a synthesized answer.
    pub fn audio(session_id: &ConversationId, audio: &SynthesizedAudio) -> Self {
        Self::new(MessageKind::AudioData, session_id.as_str()).with_audio(audio)
    }

    /// `welcome` with greeting text and its audio.
    pub fn welcome(
        session_id: &ConversationId,
        text: impl Into<String>,
        audio: &SynthesizedAudio,
    ) -> Self {
        Self::new(MessageKind::Welcome, session_id.as_str())
            .with_content(text)
            .with_audio(audio)
    }

    /// `history_data` whose content is the serialized history.
    pub fn history(session_id: &ConversationId, history_json: impl Into<String>) -> Self {
        Self::new(MessageKind::HistoryData, session_id.as_str()).with_content(history_json)
    }

    /// `error` frame for a stable code.
    pub fn error(session_id: impl Into<String>, code: ErrorCode) -> Self {
        let mut env = Self::new(MessageKind::Error, session_id);
        env.error_code = Some(code.as_str().to_owned());
        env.error_msg = Some(code.user_message().to_owned());
        env
    }

    /// `stop_ack` echoing the request's conversation id.
    pub fn stop_ack(session_id: impl Into<String>) -> Self {
        Self::new(MessageKind::StopAck, session_id)
    }

    /// `heartbeat_ack` echoing the request's conversation id.
    pub fn heartbeat_ack(session_id: impl Into<String>) -> Self {
        Self::new(MessageKind::HeartbeatAck, session_id)
    }

    /// Conversation id, if the frame names one.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        let trimmed = self.session_id.trim();
        (!trimmed.is_empty()).then(|| ConversationId::from_raw(trimmed))
    }

    /// Decode one inbound text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Malformed)
    }

    /// Encode for the wire.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    const ALL_KINDS: [&str; 13] = [
        "user_message",
        "get_welcome",
        "get_history",
        "stop",
        "heartbeat",
        "welcome",
        "ai_text_chunk",
        "ai_text_complete",
        "audio_data",
        "history_data",
        "error",
        "stop_ack",
        "heartbeat_ack",
    ];

    fn conv() -> ConversationId {
        ConversationId::from_raw("s1")
    }

    #[test]
    fn decodes_minimal_inbound_frame() {
        let env = Envelope::decode(r#"{"type":"user_message","session_id":"s1","content":"Hi"}"#)
            .unwrap();
        assert_eq!(env.kind, MessageKind::UserMessage);
        assert_eq!(env.session_id, "s1");
        assert_eq!(env.content, "Hi");
        assert_eq!(env.timestamp, 0);
        assert!(env.audio_base64.is_none());
    }

    #[test]
    fn missing_optional_fields_default() {
        let env = Envelope::decode(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(env.kind, MessageKind::Heartbeat);
        assert!(env.session_id.is_empty());
        assert!(env.conversation_id().is_none());
    }

    #[test]
    fn unknown_kind_is_preserved() {
        let env = Envelope::decode(r#"{"type":"dance","session_id":"s1"}"#).unwrap();
        assert_eq!(env.kind, MessageKind::Unknown("dance".into()));
        assert!(!env.kind.is_inbound());
        let json = env.encode().unwrap();
        assert!(json.contains(r#""type":"dance""#));
    }

    #[test]
    fn malformed_frame_is_protocol_error() {
        assert_matches!(Envelope::decode("not json"), Err(ProtocolError::Malformed(_)));
        assert_matches!(
            Envelope::decode(r#"{"content":"no type"}"#),
            Err(ProtocolError::Malformed(_))
        );
    }

    #[test]
    fn every_kind_round_trips() {
        for raw in ALL_KINDS {
            let kind = MessageKind::from(raw.to_owned());
            assert!(!matches!(kind, MessageKind::Unknown(_)), "{raw} not recognised");
            assert_eq!(kind.as_str(), raw);
            let env = Envelope::new(kind, "s1").with_content("x");
            let back = Envelope::decode(&env.encode().unwrap()).unwrap();
            assert_eq!(back, env);
        }
    }

    #[test]
    fn absent_optionals_are_omitted_on_the_wire() {
        let json = Envelope::stop_ack("s1").encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj["type"], "stop_ack");
        assert!(obj.contains_key("session_id"));
        assert!(obj.contains_key("content"));
        assert!(obj.contains_key("timestamp"));
        for key in ["audioBase64", "duration", "fullText", "errorCode", "errorMsg"] {
            assert!(!obj.contains_key(key), "{key} should be omitted");
        }
    }

    #[test]
    fn camel_case_optional_field_names() {
        let audio = SynthesizedAudio {
            bytes: vec![1, 2, 3],
            duration_ms: 1500,
        };
        let json = Envelope::audio(&conv(), &audio).encode().unwrap();
        assert!(json.contains(r#""audioBase64":"AQID""#));
        assert!(json.contains(r#""duration":1500"#));

        let json = Envelope::text_complete(&conv(), "Hello!").encode().unwrap();
        assert!(json.contains(r#""fullText":"Hello!""#));

        let json = Envelope::error("s1", ErrorCode::TtsError).encode().unwrap();
        assert!(json.contains(r#""errorCode":"TTS_ERROR""#));
        assert!(json.contains(r#""errorMsg":"#));
    }

    #[test]
    fn welcome_carries_text_and_audio() {
        let audio = SynthesizedAudio {
            bytes: b"mp3".to_vec(),
            duration_ms: 900,
        };
        let env = Envelope::welcome(&conv(), "Hello there", &audio);
        assert_eq!(env.kind, MessageKind::Welcome);
        assert_eq!(env.content, "Hello there");
        assert_eq!(env.duration, Some(900));
        assert!(env.audio_base64.is_some());
    }

    #[test]
    fn conversation_id_trims_whitespace() {
        let env = Envelope::new(MessageKind::UserMessage, "  s9 ");
        assert_eq!(env.conversation_id().unwrap().as_str(), "s9");
        let env = Envelope::new(MessageKind::UserMessage, "   ");
        assert!(env.conversation_id().is_none());
    }

    #[test]
    fn new_envelope_is_timestamped() {
        let env = Envelope::heartbeat_ack("");
        assert!(env.timestamp > 0);
    }

    proptest! {
        #[test]
        fn arbitrary_envelopes_round_trip(
            kind_idx in 0usize..ALL_KINDS.len(),
            session in ".{0,16}",
            content in ".{0,64}",
            timestamp in any::<i64>(),
            duration in proptest::option::of(any::<u32>()),
            full_text in proptest::option::of(".{0,32}"),
            error_code in proptest::option::of("[A-Z_]{1,16}"),
        ) {
            let env = Envelope {
                kind: MessageKind::from(ALL_KINDS[kind_idx].to_owned()),
                session_id: session,
                content,
                timestamp,
                audio_base64: None,
                duration,
                full_text,
                error_code,
                error_msg: None,
            };
            let back = Envelope::decode(&env.encode().unwrap()).unwrap();
            prop_assert_eq!(back, env);
        }
    }
}
