//! Session configuration pushed upstream once the upstream session exists.
//!
//! The relay recognises exactly one upstream event, `session.created`, and
//! answers it with a single `session.update` carrying the deployment's
//! [`SessionSettings`]. Everything else on the wire stays opaque.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Discriminator of the upstream's "session initialized" event.
pub const SESSION_CREATED_EVENT: &str = "session.created";

pub const DEFAULT_INSTRUCTIONS: &str = "You are a friendly and concise voice assistant for a property and \
business management platform. Reply in the language the user speaks, keep answers short and \
easy to follow when spoken aloud, and ask a clarifying question when a request is ambiguous.";

/// Server-side voice activity detection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnDetectionSettings {
    /// Activation threshold (0.0 to 1.0)
    pub threshold: f32,
    /// Audio kept before detected speech, in milliseconds
    pub prefix_padding_ms: u32,
    /// Silence that ends a turn, in milliseconds
    pub silence_duration_ms: u32,
}

impl Default for TurnDetectionSettings {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 1000,
        }
    }
}

/// Desired upstream behavior, fixed per deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Response modalities ("text", "audio")
    pub modalities: Vec<String>,
    /// Behavioral preamble
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    /// Model for transcribing user audio; `None` disables input transcription
    pub transcription_model: Option<String>,
    pub turn_detection: TurnDetectionSettings,
    pub temperature: f32,
    /// Output token cap; `None` means unlimited ("inf")
    pub max_response_output_tokens: Option<u32>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            voice: "alloy".to_string(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            transcription_model: Some("whisper-1".to_string()),
            turn_detection: TurnDetectionSettings::default(),
            temperature: 0.8,
            max_response_output_tokens: None,
        }
    }
}

impl SessionSettings {
    /// Serialize the `session.update` frame sent upstream.
    pub fn to_update_frame(&self) -> Result<String, serde_json::Error> {
        let event = ClientEvent::SessionUpdate {
            session: SessionPayload {
                modalities: &self.modalities,
                instructions: &self.instructions,
                voice: &self.voice,
                input_audio_format: &self.input_audio_format,
                output_audio_format: &self.output_audio_format,
                input_audio_transcription: self
                    .transcription_model
                    .as_deref()
                    .map(|model| InputAudioTranscription { model }),
                turn_detection: TurnDetection::ServerVad {
                    threshold: self.turn_detection.threshold,
                    prefix_padding_ms: self.turn_detection.prefix_padding_ms,
                    silence_duration_ms: self.turn_detection.silence_duration_ms,
                },
                temperature: self.temperature,
                max_response_output_tokens: match self.max_response_output_tokens {
                    Some(limit) => MaxTokens::Number(limit),
                    None => MaxTokens::Infinite("inf"),
                },
            },
        };
        serde_json::to_string(&event)
    }
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ClientEvent<'a> {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionPayload<'a> },
}

#[derive(Serialize)]
struct SessionPayload<'a> {
    modalities: &'a [String],
    instructions: &'a str,
    voice: &'a str,
    input_audio_format: &'a str,
    output_audio_format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_audio_transcription: Option<InputAudioTranscription<'a>>,
    turn_detection: TurnDetection,
    temperature: f32,
    max_response_output_tokens: MaxTokens,
}

#[derive(Serialize)]
struct InputAudioTranscription<'a> {
    model: &'a str,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum TurnDetection {
    #[serde(rename = "server_vad")]
    ServerVad {
        threshold: f32,
        prefix_padding_ms: u32,
        silence_duration_ms: u32,
    },
}

#[derive(Serialize)]
#[serde(untagged)]
enum MaxTokens {
    Number(u32),
    Infinite(&'static str),
}

#[derive(Deserialize)]
struct EventEnvelope<'a> {
    #[serde(rename = "type", borrow)]
    event_type: Cow<'a, str>,
}

/// True when a text frame is the upstream's `session.created` event.
pub fn is_session_created(text: &str) -> bool {
    serde_json::from_str::<EventEnvelope<'_>>(text)
        .map(|envelope| envelope.event_type == SESSION_CREATED_EVENT)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_default_update_frame() {
        let frame = SessionSettings::default().to_update_frame().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(value["type"], "session.update");
        let session = &value["session"];
        assert_eq!(session["modalities"], serde_json::json!(["text", "audio"]));
        assert_eq!(session["voice"], "alloy");
        assert_eq!(session["input_audio_format"], "pcm16");
        assert_eq!(session["output_audio_format"], "pcm16");
        assert_eq!(session["input_audio_transcription"]["model"], "whisper-1");
        assert_eq!(session["turn_detection"]["type"], "server_vad");
        assert_eq!(session["turn_detection"]["threshold"], 0.5);
        assert_eq!(session["turn_detection"]["prefix_padding_ms"], 300);
        assert_eq!(session["turn_detection"]["silence_duration_ms"], 1000);
        assert_eq!(session["max_response_output_tokens"], "inf");
        assert!(session["instructions"].as_str().unwrap().contains("voice assistant"));
    }

    #[test]
    fn test_custom_update_frame() {
        let settings = SessionSettings {
            modalities: vec!["audio".to_string()],
            voice: "verse".to_string(),
            transcription_model: None,
            max_response_output_tokens: Some(2048),
            temperature: 0.6,
            ..Default::default()
        };
        let value: Value = serde_json::from_str(&settings.to_update_frame().unwrap()).unwrap();
        let session = &value["session"];
        assert_eq!(session["voice"], "verse");
        assert_eq!(session["modalities"], serde_json::json!(["audio"]));
        assert!(session.get("input_audio_transcription").is_none());
        assert_eq!(session["max_response_output_tokens"], 2048);
    }

    #[test]
    fn test_detects_session_created() {
        assert!(is_session_created(
            r#"{"type":"session.created","event_id":"evt_1","session":{"id":"sess_1"}}"#
        ));
    }

    #[test]
    fn test_other_frames_are_not_session_created() {
        assert!(!is_session_created(r#"{"type":"session.updated"}"#));
        assert!(!is_session_created(r#"{"type":"response.audio.delta","delta":"AA=="}"#));
        assert!(!is_session_created(r#"{"event":"session.created"}"#));
        assert!(!is_session_created("session.created"));
        assert!(!is_session_created(""));
    }
}
