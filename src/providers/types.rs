//! Tipos de dados para requisições e respostas dos provedores de voz.
//!
//! Todas as structs derivam `Serialize` e `Deserialize` para conversão JSON
//! conforme o formato esperado por cada API.

use serde::{Deserialize, Serialize};

/// Uma voz disponível em um provedor: nome de exibição e identificador.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub name: String,
    pub voice_id: String,
}

/// Corpo da requisição para `POST {base}/audio/speech` (OpenAI e compatíveis).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechRequest {
    /// Modelo de TTS (ex.: "tts-1").
    pub model: String,
    /// Texto a ser sintetizado.
    pub input: String,
    /// Identificador da voz.
    pub voice: String,
    /// Formato do áudio retornado; sempre "wav" para permitir a montagem.
    pub response_format: String,
}

/// Corpo da requisição para `POST /v1/text-to-speech/{voice_id}` da ElevenLabs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElevenLabsRequest {
    pub text: String,
    pub model_id: String,
}

/// Corpo da requisição para a API Kokoro.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KokoroRequest {
    pub text: String,
    pub voice_id: String,
}

/// Resposta da API Kokoro: o áudio vem como data URL em base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KokoroResponse {
    /// Ex.: "data:audio/wav;base64,UklGR...". `None` quando a API não gerou áudio.
    #[serde(default)]
    pub audio: Option<String>,
}

/// Corpo da requisição para a API Ghaymah Pro.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GhaymahRequest {
    pub input: String,
    pub voice: String,
    pub response_format: String,
    pub speed: f32,
}
