use thiserror::Error;

/// Failure reported by a Markdown or HTML rendering engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("input is not valid UTF-8: {0}")]
    InvalidUtf8(String),
    #[error("render failed: {0}")]
    Render(String),
}

impl From<std::str::Utf8Error> for EngineError {
    fn from(e: std::str::Utf8Error) -> Self {
        EngineError::InvalidUtf8(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("failed to serialize document tree: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}
