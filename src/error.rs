use thiserror::Error;

/// Cuebridge crate-specific Result type alias
pub type Result<T> = std::result::Result<T, CuebridgeError>;

#[derive(Error, Debug)]
pub enum CuebridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    // 명령 채널의 목적지를 끝내 결정하지 못한 경우
    #[error("No endpoint available for the {channel} channel")]
    EndpointUnavailable { channel: String },

    #[error("UDP send to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("OSC encode error: {0}")]
    Encode(String),

    #[error("OSC decode error: {0}")]
    Decode(String),

    #[error("Port discovery failed: {0}")]
    Discovery(String),

    #[error("Pattern '{name}' not found in category '{category}'")]
    PatternNotFound { category: String, name: String },

    #[error("Tool '{tool}' received arguments validated for another tool")]
    ArgsMismatch { tool: String },
}
