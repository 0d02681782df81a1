//! JSON speech synthesis client.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use chime_core::{SynthesisError, SynthesizedAudio, Synthesizer};

/// Voice and endpoint settings for [`SpeechClient`].
#[derive(Clone, Debug)]
pub struct SpeechConfig {
    /// Bearer token.
    pub api_key: String,
    /// Synthesis endpoint.
    pub api_url: String,
    /// Voice identifier.
    pub voice: String,
    /// Audio container format, e.g. `mp3`.
    pub format: String,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Volume, 0-100.
    pub volume: i32,
    /// Relative speech rate.
    pub speech_rate: i32,
    /// Relative pitch.
    pub pitch_rate: i32,
    /// Whole-request timeout.
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct SynthesisBody<'a> {
    text: &'a str,
    voice: &'a str,
    format: &'a str,
    sample_rate: u32,
    volume: i32,
    speech_rate: i32,
    pitch_rate: i32,
}

#[derive(Debug, Deserialize)]
struct SynthesisResponse {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<SynthesisData>,
}

#[derive(Debug, Deserialize)]
struct SynthesisData {
    audio_data: String,
    #[serde(default)]
    duration: u32,
}

/// [`Synthesizer`] over a JSON HTTP API.
pub struct SpeechClient {
    http: reqwest::Client,
    config: SpeechConfig,
}

impl SpeechClient {
    /// Build the HTTP client with the configured request timeout.
    pub fn new(config: SpeechConfig) -> Result<Self, SynthesisError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SynthesisError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl Synthesizer for SpeechClient {
    #[instrument(skip_all, fields(chars = text.chars().count()))]
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SynthesisError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SynthesisError::EmptyText);
        }

        let body = SynthesisBody {
            text,
            voice: &self.config.voice,
            format: &self.config.format,
            sample_rate: self.config.sample_rate,
            volume: self.config.volume,
            speech_rate: self.config.speech_rate,
            pitch_rate: self.config.pitch_rate,
        };

        let response = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SynthesisError::Transport(e.to_string()))?;

        let status = response.status();
        let payload = response
            .text()
            .await
            .map_err(|e| SynthesisError::Transport(e.to_string()))?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "synthesis request rejected");
            return Err(SynthesisError::Api {
                code: status.as_u16().to_string(),
                message: payload.chars().take(512).collect(),
            });
        }

        let parsed: SynthesisResponse = serde_json::from_str(&payload)
            .map_err(|e| SynthesisError::InvalidAudio(format!("invalid response: {e}")))?;
        if !parsed.code.is_empty() && parsed.code != "Success" {
            return Err(SynthesisError::Api {
                code: parsed.code,
                message: parsed.message,
            });
        }

        let data = parsed
            .data
            .ok_or_else(|| SynthesisError::InvalidAudio("response has no data".into()))?;
        let bytes = BASE64
            .decode(data.audio_data.as_bytes())
            .map_err(|e| SynthesisError::InvalidAudio(e.to_string()))?;
        if bytes.is_empty() {
            return Err(SynthesisError::InvalidAudio("empty audio".into()));
        }

        debug!(bytes = bytes.len(), duration_ms = data.duration, "speech synthesized");
        Ok(SynthesizedAudio {
            bytes,
            duration_ms: data.duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> SpeechClient {
        SpeechClient::new(SpeechConfig {
            api_key: "tts-key".into(),
            api_url: format!("{}/tts", server.uri()),
            voice: "longxiaochun".into(),
            format: "mp3".into(),
            sample_rate: 22_050,
            volume: 50,
            speech_rate: 0,
            pitch_rate: 0,
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn decodes_audio_and_duration() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tts"))
            .and(header("authorization", "Bearer tts-key"))
            .and(body_json(json!({
                "text": "Hello!",
                "voice": "longxiaochun",
                "format": "mp3",
                "sample_rate": 22050,
                "volume": 50,
                "speech_rate": 0,
                "pitch_rate": 0
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "Success",
                "data": {"audio_data": "AQID", "duration": 1200}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let audio = client(&server).synthesize("  Hello!  ").await.unwrap();
        assert_eq!(audio.bytes, vec![1, 2, 3]);
        assert_eq!(audio.duration_ms, 1200);
    }

    #[tokio::test]
    async fn empty_text_is_rejected_without_a_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let result = client(&server).synthesize("   ").await;
        assert_matches!(result, Err(SynthesisError::EmptyText));
    }

    #[tokio::test]
    async fn api_error_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "InvalidParameter",
                "message": "voice not found"
            })))
            .mount(&server)
            .await;

        let result = client(&server).synthesize("hi").await;
        assert_matches!(
            result,
            Err(SynthesisError::Api { code, message }) if code == "InvalidParameter" && message == "voice not found"
        );
    }

    #[tokio::test]
    async fn http_failure_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let result = client(&server).synthesize("hi").await;
        assert_matches!(result, Err(SynthesisError::Api { code, .. }) if code == "503");
    }

    #[tokio::test]
    async fn invalid_base64_is_invalid_audio() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"audio_data": "not base64!!", "duration": 10}
            })))
            .mount(&server)
            .await;

        let result = client(&server).synthesize("hi").await;
        assert_matches!(result, Err(SynthesisError::InvalidAudio(_)));
    }

    #[tokio::test]
    async fn missing_data_is_invalid_audio() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": ""})))
            .mount(&server)
            .await;

        let result = client(&server).synthesize("hi").await;
        assert_matches!(result, Err(SynthesisError::InvalidAudio(_)));
    }
}
