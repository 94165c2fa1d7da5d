use reqwest::StatusCode;

/// Failures of the archive pipeline. Every stage fails fast and hands its
/// error to the caller unchanged.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ArchiveError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("Could not resolve handle \"{handle}\": {status}")]
    Resolution { handle: String, status: StatusCode },
    #[error("Could not fetch thread: {status}")]
    Fetch { status: StatusCode },
    #[error("Unexpected API response: {0}")]
    Protocol(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("archive timed out before the thread was fully fetched")]
    Timeout,
}

impl ArchiveError {
    /// Upstream HTTP status, when the failure carries one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ArchiveError::Resolution { status, .. } | ArchiveError::Fetch { status } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ArchiveError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ArchiveError::Timeout;
        }
        ArchiveError::Network(err.to_string())
    }
}
