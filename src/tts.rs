//! Text-to-speech synthesis
//!
//! Produces encoded audio bytes for announcement text. The engine only ever
//! sees opaque encoded bytes; decoding them into PCM is the announcement
//! injector's job, so any provider that returns a format the decode stage
//! understands plugs in here.

use crate::config::TtsConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const API_BASE: &str = "https://api.elevenlabs.io/v1/text-to-speech";
const OUTPUT_FORMAT: &str = "mp3_44100_128";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Turns announcement text into encoded audio bytes.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    speed: f32,
    use_speaker_boost: bool,
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

/// ElevenLabs HTTP synthesis backend.
pub struct ElevenLabsTts {
    client: reqwest::Client,
    api_key: String,
    voice_id: String,
    model_id: String,
}

impl ElevenLabsTts {
    /// Build from configuration; `None` when no API key is configured, in
    /// which case announcements are simply unavailable.
    pub fn from_config(config: &TtsConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.api_key.clone() else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Tts(format!("failed to build HTTP client: {}", e)))?;

        Ok(Some(Self {
            client,
            api_key,
            voice_id: config.voice_id.clone(),
            model_id: config.model_id.clone(),
        }))
    }
}

#[async_trait]
impl TtsProvider for ElevenLabsTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/{}?output_format={}",
            API_BASE, self.voice_id, OUTPUT_FORMAT
        );
        let body = SynthesisRequest {
            text,
            model_id: &self.model_id,
            voice_settings: VoiceSettings {
                stability: 0.58,
                similarity_boost: 0.82,
                speed: 0.84,
                use_speaker_boost: true,
            },
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!(
                "synthesis failed with status {}: {}",
                status,
                detail.chars().take(200).collect::<String>()
            )));
        }

        let audio = response.bytes().await?.to_vec();
        debug!(chars = text.len(), bytes = audio.len(), "synthesized announcement");
        if audio.is_empty() {
            return Err(Error::Tts("synthesis returned no audio".into()));
        }
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_key(key: Option<&str>) -> TtsConfig {
        TtsConfig {
            api_key: key.map(str::to_string),
            ..TtsConfig::default()
        }
    }

    #[test]
    fn test_no_api_key_disables_provider() {
        let provider = ElevenLabsTts::from_config(&config_with_key(None)).unwrap();
        assert!(provider.is_none());
    }

    #[test]
    fn test_api_key_enables_provider() {
        let provider = ElevenLabsTts::from_config(&config_with_key(Some("secret"))).unwrap();
        let provider = provider.unwrap();
        assert_eq!(provider.voice_id, TtsConfig::default().voice_id);
    }

    #[test]
    fn test_request_body_shape() {
        let body = SynthesisRequest {
            text: "now playing",
            model_id: "eleven_multilingual_v2",
            voice_settings: VoiceSettings {
                stability: 0.58,
                similarity_boost: 0.82,
                speed: 0.84,
                use_speaker_boost: true,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["text"], "now playing");
        assert_eq!(json["model_id"], "eleven_multilingual_v2");
        assert_eq!(json["voice_settings"]["use_speaker_boost"], true);
    }
}
