//! Classifying provider error responses.

use quill_core::Error;

/// Coarse class of a non-2xx provider answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAIErrorCode {
    AuthenticationError,
    RateLimitExceeded,
    ModelNotFound,
    ContextLengthExceeded,
    ServerError,
    Unknown,
}

impl OpenAIErrorCode {
    pub fn from_response(status: u16, error_type: &str) -> Self {
        match status {
            401 | 403 => Self::AuthenticationError,
            429 => Self::RateLimitExceeded,
            404 => Self::ModelNotFound,
            _ if error_type == "model_not_found" => Self::ModelNotFound,
            400 if error_type.contains("context_length") => Self::ContextLengthExceeded,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Misconfiguration the retry budget cannot fix.
    pub fn is_config(self) -> bool {
        matches!(self, Self::AuthenticationError | Self::ModelNotFound)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Chunk,
    Embed,
}

/// Map a classified failure to the pipeline's error type: credential and
/// model problems become `Config`, the rest the operation's provider error.
pub fn to_quill_error(op: Operation, code: OpenAIErrorCode, message: &str) -> Error {
    if code.is_config() {
        return Error::Config(format!("provider rejected configuration: {}", message));
    }
    let message = match code {
        OpenAIErrorCode::RateLimitExceeded => format!("rate limited: {}", message),
        OpenAIErrorCode::ContextLengthExceeded => format!("input too long: {}", message),
        OpenAIErrorCode::ServerError => format!("provider failure: {}", message),
        _ => message.to_string(),
    };
    match op {
        Operation::Chunk => Error::Inference(message),
        Operation::Embed => Error::Embedding(message),
    }
}
