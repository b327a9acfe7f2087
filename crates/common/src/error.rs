//! Error types shared across reelkit crates.

use std::path::PathBuf;

/// Pipeline stage an error originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Setup,
    Decode,
    Encode,
    Write,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Setup => "setup",
            Stage::Decode => "decode",
            Stage::Encode => "encode",
            Stage::Write => "write",
        }
    }
}

/// Top-level error type for reelkit operations.
#[derive(Debug, thiserror::Error)]
pub enum ReelkitError {
    #[error("Decode error in content {content}: {message}")]
    Decode { content: String, message: String },

    #[error("Encode error at frame {frame}: {message}")]
    Encode { frame: i64, message: String },

    #[error("Write error at {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("Playlist error: {message}")]
    Playlist { message: String },

    #[error("Reference error: {message}")]
    Reference { message: String },

    #[error("Remote encode error: {message}")]
    Remote { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Run cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using ReelkitError.
pub type ReelkitResult<T> = Result<T, ReelkitError>;

impl ReelkitError {
    pub fn decode(content: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Decode {
            content: content.into(),
            message: msg.into(),
        }
    }

    pub fn encode(frame: i64, msg: impl Into<String>) -> Self {
        Self::Encode {
            frame,
            message: msg.into(),
        }
    }

    pub fn write(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Write {
            path: path.into(),
            message: msg.into(),
        }
    }

    pub fn playlist(msg: impl Into<String>) -> Self {
        Self::Playlist {
            message: msg.into(),
        }
    }

    pub fn reference(msg: impl Into<String>) -> Self {
        Self::Reference {
            message: msg.into(),
        }
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Which stage of the pipeline produced this error.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Decode { .. } => Stage::Decode,
            Self::Encode { .. } | Self::Remote { .. } => Stage::Encode,
            Self::Write { .. } | Self::Io(_) => Stage::Write,
            _ => Stage::Setup,
        }
    }
}
