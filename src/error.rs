//! Error handling for camlapse

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Capture error (stream unreachable, ffmpeg failure, timeout)
    #[error("Capture error: {0}")]
    Capture(String),

    /// Storage error (frame write/delete failure)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Encode error (external encoder failure or unusable selection)
    #[error("Encode error: {0}")]
    Encode(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode/encode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// YAML parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
