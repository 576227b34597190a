use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Folder hierarchy changed: {0}")]
    FolderHierarchyChanged(String),

    #[error("Write denied, adapter is read-only: {0}")]
    ReadOnlyDenied(String),

    #[error("Malformed content: {0}")]
    MalformedContent(String),

    #[error("Transient store failure: {0}")]
    Transient(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Mail submission failed: {0}")]
    SubmissionFailed(String),

    #[error("Device state error: {0}")]
    State(String),
}

impl GatewayError {
    /// Only a lost or refused connection ends the session; everything else
    /// is reported per item or per folder.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::ConnectionFailure(_))
    }
}

impl From<mailparse::MailParseError> for GatewayError {
    fn from(e: mailparse::MailParseError) -> Self {
        GatewayError::MalformedContent(e.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::State(e.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        GatewayError::State(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Turns a non-fatal store failure into a negative answer.
pub fn negative<T>(result: Result<T>, fallback: T, operation: &str) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            warn!(operation, %err, "store operation failed");
            Ok(fallback)
        }
    }
}
