use thiserror::Error;

#[derive(Error, Debug)]
pub enum CleanserError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Watermark detection error: {0}")]
    Detection(String),

    #[error("Media processing error: {0}")]
    Media(String),

    #[error("Inpaint error: {0}")]
    Inpaint(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Processing cancelled")]
    Cancelled,
}

impl CleanserError {
    /// Short label used in logs and the status file
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Toml(_) => "toml",
            Self::Http(_) => "http",
            Self::Image(_) => "image",
            Self::Detection(_) => "detection",
            Self::Media(_) => "media",
            Self::Inpaint(_) => "inpaint",
            Self::Queue(_) => "queue",
            Self::Config(_) => "config",
            Self::FileNotFound(_) => "file_not_found",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, CleanserError>;
