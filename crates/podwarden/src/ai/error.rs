use thiserror::Error;

/// Errors from chat-completion and embedding providers.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("{provider} request failed: {source}")]
    Http {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} API error ({status}): {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("failed to parse {provider} response: {reason}")]
    Parse {
        provider: &'static str,
        reason: String,
    },

    #[error("{0} returned no content")]
    Empty(&'static str),

    #[error("structured output is not valid JSON: {0}")]
    Structured(String),
}
