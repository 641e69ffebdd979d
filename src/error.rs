//! Error types for the mind map renderer

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for render operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while turning an outline into an image
#[derive(Error, Debug)]
pub enum Error {
    /// Request shape or range is invalid (never reaches rendering)
    #[error("Invalid request: {0}")]
    ValidationError(String),

    /// Input text could not be turned into an outline tree
    #[error("Transform failed: {0}")]
    TransformError(String),

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Failed to start the rendering context
    #[error("Rendering context initialization failed: {0}")]
    InitializationError(String),

    /// Failed to load the assembled document
    #[error("Failed to load document: {0}")]
    LoadError(String),

    /// Failed to render or capture content
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// Failed to execute JavaScript inside the rendering context
    #[error("Script execution failed: {0}")]
    ScriptError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Static layout assets are missing or unreadable
    #[error("Asset error: {0}")]
    AssetError(String),

    /// Writing the captured image failed
    #[error("Failed to write {}: {source}", path.display())]
    OutputError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The caller abandoned the render
    #[error("Render cancelled")]
    Cancelled,

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),
}

/// Stable, coarse classification of an [`Error`].
///
/// The kind is what callers should branch on; the message is for humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Transform,
    Timeout,
    Capture,
    Io,
    Config,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Transform => "transform",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Capture => "capture",
            ErrorKind::Io => "io",
            ErrorKind::Config => "config",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ValidationError(_) => ErrorKind::Validation,
            Error::TransformError(_) => ErrorKind::Transform,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::InitializationError(_)
            | Error::LoadError(_)
            | Error::RenderError(_)
            | Error::ScriptError(_) => ErrorKind::Capture,
            #[cfg(feature = "cdp")]
            Error::CdpError(_) => ErrorKind::Capture,
            Error::OutputError { .. } => ErrorKind::Io,
            Error::ConfigError(_) | Error::AssetError(_) => ErrorKind::Config,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_stage_errors_share_a_kind() {
        assert_eq!(Error::LoadError("x".into()).kind(), ErrorKind::Capture);
        assert_eq!(Error::RenderError("x".into()).kind(), ErrorKind::Capture);
        assert_eq!(Error::InitializationError("x".into()).kind(), ErrorKind::Capture);
    }

    #[test]
    fn timeout_message_carries_budget() {
        let err = Error::Timeout(30000);
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Operation timed out after 30000ms");
    }

    #[cfg(feature = "cdp")]
    #[test]
    fn protocol_errors_convert_to_capture_failures() {
        let err: Error = anyhow::anyhow!("websocket closed").into();
        assert!(matches!(err, Error::CdpError(ref m) if m == "websocket closed"));
        assert_eq!(err.kind(), ErrorKind::Capture);
    }

    #[test]
    fn output_error_names_the_path() {
        let err = Error::OutputError {
            path: PathBuf::from("/tmp/out.png"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("/tmp/out.png"));
        assert_eq!(err.kind().as_str(), "io");
    }
}
