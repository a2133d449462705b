use std::collections::BTreeMap;

use reqwest::Client;

use super::client::send_for_audio;
use super::error::SynthesisError;
use super::types::{SpeechRequest, Voice};
use super::voice_list;
use crate::config::ProviderConfig;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "tts-1";

/// OpenAI `audio/speech` endpoint, or any API compatible with it.
pub struct OpenAiProvider {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
    voices: BTreeMap<String, String>,
}

impl OpenAiProvider {
    pub fn from_config(
        name: &str,
        config: &ProviderConfig,
        http: Client,
    ) -> Result<Self, SynthesisError> {
        if config.api_key.is_empty() {
            return Err(SynthesisError::NotConfigured {
                provider: name.to_string(),
                reason: "API key for this provider is required but was not found".into(),
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
            voices: config.voices.clone(),
        })
    }

    pub async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>, SynthesisError> {
        let body = SpeechRequest {
            model: self.model.clone(),
            input: text.to_string(),
            voice: voice_id.to_string(),
            response_format: "wav".into(),
        };
        let request = self
            .http
            .post(format!("{}/audio/speech", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body);
        send_for_audio(request).await
    }

    pub fn voices(&self) -> Vec<Voice> {
        voice_list(&self.voices)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::audio::testing::tone;
    use crate::config::ProviderKind;
    use crate::providers::client::build_client;

    fn config(base_url: &str, api_key: &str) -> ProviderConfig {
        ProviderConfig {
            kind: ProviderKind::OpenAi,
            api_key: api_key.into(),
            base_url: Some(base_url.into()),
            model: None,
            voices: BTreeMap::from([("Alloy".to_string(), "alloy".to_string())]),
            sample_rate: None,
        }
    }

    #[tokio::test]
    async fn posts_speech_request_with_bearer_auth() {
        let server = MockServer::start().await;
        let wav = tone(3, 16);
        Mock::given(method("POST"))
            .and(path("/audio/speech"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_json(serde_json::json!({
                "model": "tts-1",
                "input": "Hello there",
                "voice": "alloy",
                "response_format": "wav"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(wav.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAiProvider::from_config(
            "openai",
            &config(&server.uri(), "sk-test"),
            build_client(Duration::from_secs(5)),
        )
        .unwrap();
        let audio = provider.synthesize("Hello there", "alloy").await.unwrap();
        assert_eq!(audio, wav);
    }

    #[test]
    fn missing_api_key_is_not_configured() {
        let result = OpenAiProvider::from_config(
            "openai",
            &config("http://localhost", ""),
            build_client(Duration::from_secs(5)),
        );
        assert!(matches!(result, Err(SynthesisError::NotConfigured { .. })));
    }

    #[test]
    fn voices_come_from_config() {
        let provider = OpenAiProvider::from_config(
            "openai",
            &config("http://localhost", "sk"),
            build_client(Duration::from_secs(5)),
        )
        .unwrap();
        assert_eq!(
            provider.voices(),
            vec![Voice {
                name: "Alloy".into(),
                voice_id: "alloy".into()
            }]
        );
    }
}
