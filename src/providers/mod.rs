//! Speech-synthesis providers.
//!
//! A unit names its provider; [`ProviderRegistry`] maps that name to one
//! configured [`Provider`] variant. The rest of the crate only sees the
//! [`Synthesizer`] capability.

pub mod client;
pub mod elevenlabs;
pub mod error;
pub mod ghaymah;
pub mod kokoro;
pub mod openai;
pub mod types;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

pub use elevenlabs::ElevenLabsProvider;
pub use error::SynthesisError;
pub use ghaymah::GhaymahProvider;
pub use kokoro::KokoroProvider;
pub use openai::OpenAiProvider;
pub use types::Voice;

use crate::config::{ProviderConfig, ProviderKind};

/// One synthesis call: which provider, which voice, what text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    pub provider: String,
    pub voice: String,
    pub text: String,
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Names of the providers that can be selected.
    fn providers(&self) -> Vec<String>;

    /// Voices for `provider`, or `None` if no such provider exists.
    fn voices(&self, provider: &str) -> Option<Vec<Voice>>;

    /// Produce WAV audio for the request. Safe to retry.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, SynthesisError>;

    /// Map a voice given by id or display name onto the provider's voice id.
    fn resolve_voice(&self, provider: &str, voice: &str) -> Result<String, SynthesisError> {
        let voices = self
            .voices(provider)
            .ok_or_else(|| SynthesisError::UnknownProvider(provider.to_string()))?;
        voices
            .iter()
            .find(|v| v.voice_id == voice)
            .or_else(|| voices.iter().find(|v| v.name == voice))
            .map(|v| v.voice_id.clone())
            .ok_or_else(|| SynthesisError::UnknownVoice {
                provider: provider.to_string(),
                voice: voice.to_string(),
            })
    }
}

pub(crate) fn voice_list(voices: &BTreeMap<String, String>) -> Vec<Voice> {
    voices
        .iter()
        .map(|(name, voice_id)| Voice {
            name: name.clone(),
            voice_id: voice_id.clone(),
        })
        .collect()
}

pub enum Provider {
    OpenAi(OpenAiProvider),
    ElevenLabs(ElevenLabsProvider),
    Kokoro(KokoroProvider),
    Ghaymah(GhaymahProvider),
}

impl Provider {
    pub fn from_config(
        name: &str,
        config: &ProviderConfig,
        http: reqwest::Client,
    ) -> Result<Self, SynthesisError> {
        Ok(match config.kind {
            ProviderKind::OpenAi => Provider::OpenAi(OpenAiProvider::from_config(name, config, http)?),
            ProviderKind::ElevenLabs => {
                Provider::ElevenLabs(ElevenLabsProvider::from_config(name, config, http)?)
            }
            ProviderKind::Kokoro => Provider::Kokoro(KokoroProvider::from_config(name, config, http)?),
            ProviderKind::Ghaymah => {
                Provider::Ghaymah(GhaymahProvider::from_config(name, config, http)?)
            }
        })
    }

    pub async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>, SynthesisError> {
        match self {
            Provider::OpenAi(p) => p.synthesize(text, voice_id).await,
            Provider::ElevenLabs(p) => p.synthesize(text, voice_id).await,
            Provider::Kokoro(p) => p.synthesize(text, voice_id).await,
            Provider::Ghaymah(p) => p.synthesize(text, voice_id).await,
        }
    }

    pub fn voices(&self) -> Vec<Voice> {
        match self {
            Provider::OpenAi(p) => p.voices(),
            Provider::ElevenLabs(p) => p.voices(),
            Provider::Kokoro(p) => p.voices(),
            Provider::Ghaymah(p) => p.voices(),
        }
    }
}

/// Provider name → configured provider.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Provider>,
}

impl ProviderRegistry {
    /// Initialise every configured provider. Ones that fail (e.g. a missing
    /// API key) are skipped with a warning rather than aborting startup.
    pub fn from_config(configs: &BTreeMap<String, ProviderConfig>, timeout: Duration) -> Self {
        let http = client::build_client(timeout);
        let mut registry = Self::default();
        for (name, config) in configs {
            match Provider::from_config(name, config, http.clone()) {
                Ok(provider) => registry.insert(name.clone(), provider),
                Err(e) => warn!(provider = %name, error = %e, "failed to initialize provider, skipping"),
            }
        }
        info!(providers = ?registry.providers(), "providers initialized");
        registry
    }

    pub fn insert(&mut self, name: impl Into<String>, provider: Provider) {
        self.providers.insert(name.into(), provider);
    }
}

#[async_trait]
impl Synthesizer for ProviderRegistry {
    fn providers(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    fn voices(&self, provider: &str) -> Option<Vec<Voice>> {
        self.providers.get(provider).map(Provider::voices)
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, SynthesisError> {
        let provider = self
            .providers
            .get(&request.provider)
            .ok_or_else(|| SynthesisError::UnknownProvider(request.provider.clone()))?;
        provider.synthesize(&request.text, &request.voice).await
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::audio::testing::tone;

    fn openai(base_url: &str, api_key: &str) -> ProviderConfig {
        ProviderConfig {
            kind: ProviderKind::OpenAi,
            api_key: api_key.into(),
            base_url: Some(base_url.into()),
            model: None,
            voices: BTreeMap::from([
                ("Alloy".to_string(), "alloy".to_string()),
                ("Nova".to_string(), "nova".to_string()),
            ]),
            sample_rate: None,
        }
    }

    #[test]
    fn skips_providers_that_fail_to_initialize() {
        let configs = BTreeMap::from([
            ("openai".to_string(), openai("http://localhost", "sk")),
            ("broken".to_string(), openai("http://localhost", "")),
        ]);
        let registry = ProviderRegistry::from_config(&configs, Duration::from_secs(5));
        assert_eq!(registry.providers(), vec!["openai".to_string()]);
        assert!(registry.voices("broken").is_none());
    }

    #[test]
    fn resolves_voice_by_id_or_name() {
        let configs = BTreeMap::from([("openai".to_string(), openai("http://localhost", "sk"))]);
        let registry = ProviderRegistry::from_config(&configs, Duration::from_secs(5));

        assert_eq!(registry.resolve_voice("openai", "nova").unwrap(), "nova");
        assert_eq!(registry.resolve_voice("openai", "Alloy").unwrap(), "alloy");
        assert!(matches!(
            registry.resolve_voice("openai", "robot"),
            Err(SynthesisError::UnknownVoice { .. })
        ));
        assert!(matches!(
            registry.resolve_voice("missing", "alloy"),
            Err(SynthesisError::UnknownProvider(_))
        ));
    }

    #[tokio::test]
    async fn dispatches_to_named_provider() {
        let server = MockServer::start().await;
        let wav = tone(1, 4);
        Mock::given(method("POST"))
            .and(path("/audio/speech"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(wav.clone()))
            .mount(&server)
            .await;

        let configs = BTreeMap::from([("openai".to_string(), openai(&server.uri(), "sk"))]);
        let registry = ProviderRegistry::from_config(&configs, Duration::from_secs(5));

        let audio = registry
            .synthesize(&SynthesisRequest {
                provider: "openai".into(),
                voice: "alloy".into(),
                text: "hello".into(),
            })
            .await
            .unwrap();
        assert_eq!(audio, wav);

        let err = registry
            .synthesize(&SynthesisRequest {
                provider: "nope".into(),
                voice: "alloy".into(),
                text: "hello".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::UnknownProvider(_)));
    }
}
