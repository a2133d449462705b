use std::collections::BTreeMap;

use reqwest::Client;

use super::client::send_for_audio;
use super::error::SynthesisError;
use super::types::{ElevenLabsRequest, Voice};
use super::voice_list;
use crate::audio;
use crate::config::ProviderConfig;

const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io";
const DEFAULT_MODEL: &str = "eleven_multilingual_v2";
const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// ElevenLabs text-to-speech. Audio is requested as raw PCM and wrapped in a
/// WAV header locally.
pub struct ElevenLabsProvider {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
    sample_rate: u32,
    voices: BTreeMap<String, String>,
}

impl ElevenLabsProvider {
    pub fn from_config(
        name: &str,
        config: &ProviderConfig,
        http: Client,
    ) -> Result<Self, SynthesisError> {
        if config.api_key.is_empty() {
            return Err(SynthesisError::NotConfigured {
                provider: name.to_string(),
                reason: "ElevenLabs API key is not configured".into(),
            });
        }
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            sample_rate: config.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
            voices: config.voices.clone(),
        })
    }

    pub async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>, SynthesisError> {
        let body = ElevenLabsRequest {
            text: text.to_string(),
            model_id: self.model.clone(),
        };
        let request = self
            .http
            .post(format!(
                "{}/v1/text-to-speech/{voice_id}",
                self.base_url.trim_end_matches('/')
            ))
            .query(&[("output_format", format!("pcm_{}", self.sample_rate))])
            .header("xi-api-key", &self.api_key)
            .json(&body);
        let pcm = send_for_audio(request).await?;
        audio::wrap_pcm16(&pcm, self.sample_rate, 1)
            .map_err(|e| SynthesisError::InvalidResponse(e.to_string()))
    }

    pub fn voices(&self) -> Vec<Voice> {
        voice_list(&self.voices)
    }
}
