use std::collections::BTreeMap;

use reqwest::Client;
use tracing::debug;

use super::client::send_for_audio;
use super::error::SynthesisError;
use super::types::{GhaymahRequest, Voice};
use super::voice_list;
use crate::config::ProviderConfig;

/// Ghaymah Pro Arabic TTS API.
pub struct GhaymahProvider {
    http: Client,
    api_key: String,
    base_url: String,
    voices: BTreeMap<String, String>,
}

impl GhaymahProvider {
    pub fn from_config(
        name: &str,
        config: &ProviderConfig,
        http: Client,
    ) -> Result<Self, SynthesisError> {
        let not_configured = |reason: &str| SynthesisError::NotConfigured {
            provider: name.to_string(),
            reason: reason.to_string(),
        };
        if config.api_key.is_empty() {
            return Err(not_configured("Ghaymah Pro API key is not configured"));
        }
        let base_url = config
            .base_url
            .clone()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| not_configured("Ghaymah Pro API base URL is not configured"))?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url,
            voices: config.voices.clone(),
        })
    }

    pub async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>, SynthesisError> {
        debug!(voice = voice_id, chars = text.chars().count(), "ghaymah synthesis");
        let body = GhaymahRequest {
            input: text.to_string(),
            voice: voice_id.to_string(),
            response_format: "wav".into(),
            speed: 1.0,
        };
        let request = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&body);
        send_for_audio(request).await
    }

    pub fn voices(&self) -> Vec<Voice> {
        voice_list(&self.voices)
    }
}
