use thiserror::Error;

/// Everything that can end a `speak` attempt early.
///
/// Cloneable so failures can be fanned out to event subscribers as well as logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TtsError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("TTS endpoint returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("malformed TTS response: {0}")]
    Parse(String),

    #[error("TTS response carried no audio: {0}")]
    EmptyPayload(&'static str),

    #[error("failed to build audio artifact: {0}")]
    Encode(String),

    #[error("playback failed: {0}")]
    Playback(String),
}

impl TtsError {
    /// HTTP status code, when the failure came from a non-2xx response.
    pub fn status(&self) -> Option<u16> {
        match self {
            TtsError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TtsError {
    fn from(err: reqwest::Error) -> Self {
        TtsError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for TtsError {
    fn from(err: serde_json::Error) -> Self {
        TtsError::Parse(err.to_string())
    }
}

impl From<base64::DecodeError> for TtsError {
    fn from(err: base64::DecodeError) -> Self {
        TtsError::Parse(format!("inline audio is not valid base64: {err}"))
    }
}

impl From<std::io::Error> for TtsError {
    fn from(err: std::io::Error) -> Self {
        TtsError::Encode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TtsError>;
