//! Central error handling for the IBL and temporal pipeline
//!
//! Provides a unified RenderError enum with consistent categorization.
//! Every fallible operation in the crate returns [`RenderResult`].

/// Centralized error type for all pipeline operations
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("Device error: {0}")]
    Device(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Readback error: {0}")]
    Readback(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderError {
    /// Short category tag, used as a prefix by the CLI
    pub fn category(&self) -> &'static str {
        match self {
            RenderError::Device(_) => "Device",
            RenderError::Upload(_) => "Upload",
            RenderError::Render(_) => "Render",
            RenderError::Readback(_) => "Readback",
            RenderError::Config(_) => "Config",
            RenderError::Io(_) => "IO",
        }
    }

    /// Convenience constructors for common error types
    pub fn device<T: ToString>(msg: T) -> Self {
        RenderError::Device(msg.to_string())
    }

    pub fn upload<T: ToString>(msg: T) -> Self {
        RenderError::Upload(msg.to_string())
    }

    pub fn render<T: ToString>(msg: T) -> Self {
        RenderError::Render(msg.to_string())
    }

    pub fn readback<T: ToString>(msg: T) -> Self {
        RenderError::Readback(msg.to_string())
    }

    pub fn config<T: ToString>(msg: T) -> Self {
        RenderError::Config(msg.to_string())
    }

    pub fn io<T: ToString>(msg: T) -> Self {
        RenderError::Io(std::io::Error::new(std::io::ErrorKind::Other, msg.to_string()))
    }
}

impl From<serde_json::Error> for RenderError {
    fn from(err: serde_json::Error) -> Self {
        RenderError::Config(err.to_string())
    }
}

/// Result type alias for pipeline operations
pub type RenderResult<T> = Result<T, RenderError>;
