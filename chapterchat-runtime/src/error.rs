use chapterchat_engine::traits::BackendError;
use thiserror::Error;

/// Terminal failure of one logical request, after retries and auth handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("network failure after {attempts} attempts: {last}")]
    Network { attempts: u32, last: String },

    #[error("unauthorized (session cleared: {session_cleared})")]
    Unauthorized { session_cleared: bool },

    #[error("server returned {status}")]
    Backend { status: u16, message: Option<String> },

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    Invalid(String),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Backend { status, .. } => Some(*status),
            ClientError::Unauthorized { .. } => Some(401),
            _ => None,
        }
    }

    pub fn decode(e: anyhow::Error) -> Self {
        ClientError::Decode(format!("{e:#}"))
    }
}

impl From<ClientError> for BackendError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Network { .. } => BackendError::Network,
            ClientError::Unauthorized { .. } => BackendError::Unauthorized,
            ClientError::Backend { status: 404, .. } => BackendError::NotFound,
            ClientError::Backend { status, message } => BackendError::Server { status, message },
            ClientError::Decode(m) | ClientError::Invalid(m) => BackendError::Other(m),
        }
    }
}
