//! Erros do provedor de geração de texto.

use thiserror::Error;

/// Falhas ao pedir texto ao provedor.
///
/// `InvalidJson` guarda a resposta bruta para que o diagnóstico do job mostre
/// exatamente o que o modelo devolveu.
#[derive(Debug, Error)]
pub enum TextGenError {
    /// HTTP 429. `retry_after_ms` vem do cabeçalho `retry-after`.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Qualquer outro status HTTP de erro.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Falha de rede (DNS, conexão recusada, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A resposta não tinha nenhum bloco de texto.
    #[error("provider returned no text")]
    Empty,

    /// Foi pedido JSON e a resposta não era um objeto JSON.
    #[error("expected a JSON object: {reason}")]
    InvalidJson { reason: String, raw: String },
}

impl TextGenError {
    /// Resposta bruta do modelo, quando existe.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            TextGenError::InvalidJson { raw, .. } => Some(raw),
            _ => None,
        }
    }
}
