//! Tipos de erro para os provedores de síntese de voz.
//!
//! Define [`SynthesisError`] com variantes para provedor/voz desconhecidos,
//! rate limiting, erros da API e erros de rede. Usa `thiserror` para derivar
//! `Display` e `Error` a partir dos atributos `#[error(...)]`.

use thiserror::Error;

/// Erros que podem ocorrer ao sintetizar um bloco de texto.
///
/// Toda falha aqui vira o resultado `failed` da unidade; o núcleo não
/// retenta indefinidamente, a reentrega fica a cargo do canal de despacho.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Nenhum provedor registrado com esse nome.
    #[error("provider not found: {0}")]
    UnknownProvider(String),

    /// A voz não pertence ao provedor informado.
    #[error("voice `{voice}` is not available for provider `{provider}`")]
    UnknownVoice { provider: String, voice: String },

    /// O provedor não pôde ser inicializado (ex.: chave de API ausente).
    #[error("provider `{provider}` is not configured: {reason}")]
    NotConfigured { provider: String, reason: String },

    /// O servidor retornou HTTP 429 (rate limit).
    /// O campo `retry_after_ms` indica quantos milissegundos esperar antes de retentar.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Erro retornado pela API (ex.: 401 chave inválida, 500 erro interno).
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// A resposta chegou, mas sem áudio utilizável.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A chamada excedeu o tempo limite configurado.
    #[error("synthesis timed out")]
    Timeout,

    /// Falha de rede subjacente (DNS, conexão recusada).
    #[error("network error: {0}")]
    NetworkError(#[source] reqwest::Error),
}

impl From<reqwest::Error> for SynthesisError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SynthesisError::Timeout
        } else {
            SynthesisError::NetworkError(err)
        }
    }
}
