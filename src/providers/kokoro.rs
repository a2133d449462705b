use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;

use super::client::send;
use super::error::SynthesisError;
use super::types::{KokoroRequest, KokoroResponse, Voice};
use super::voice_list;
use crate::config::ProviderConfig;

/// Kokoro TTS API. Returns the audio as a base64 data URL inside JSON.
pub struct KokoroProvider {
    http: Client,
    base_url: String,
    voices: BTreeMap<String, String>,
}

impl KokoroProvider {
    pub fn from_config(
        name: &str,
        config: &ProviderConfig,
        http: Client,
    ) -> Result<Self, SynthesisError> {
        let base_url = config
            .base_url
            .clone()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| SynthesisError::NotConfigured {
                provider: name.to_string(),
                reason: "Kokoro API base URL is not configured".into(),
            })?;
        let voices = if config.voices.is_empty() {
            BTreeMap::from([("Default".to_string(), "0".to_string())])
        } else {
            config.voices.clone()
        };
        Ok(Self {
            http,
            base_url,
            voices,
        })
    }

    pub async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>, SynthesisError> {
        let body = KokoroRequest {
            text: text.to_string(),
            voice_id: voice_id.to_string(),
        };
        let response: KokoroResponse = send(self.http.post(&self.base_url).json(&body))
            .await?
            .json()
            .await?;
        let data_url = response
            .audio
            .ok_or_else(|| SynthesisError::InvalidResponse("no audio data returned from API".into()))?;
        decode_data_url(&data_url)
    }

    pub fn voices(&self) -> Vec<Voice> {
        voice_list(&self.voices)
    }
}

/// Decode `data:<mime>;base64,<payload>`; a bare payload is accepted too.
fn decode_data_url(data_url: &str) -> Result<Vec<u8>, SynthesisError> {
    let payload = data_url
        .split_once(',')
        .map(|(_, payload)| payload)
        .unwrap_or(data_url);
    STANDARD
        .decode(payload.trim())
        .map_err(|e| SynthesisError::InvalidResponse(format!("bad base64 audio: {e}")))
}
