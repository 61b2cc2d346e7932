use thiserror::Error;

/// Coarse classification of a fetch failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Auth,
    NotFound,
    Transient,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Auth => "auth",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Transient => "transient",
        };
        f.write_str(name)
    }
}

/// Error returned for a single secret request.
///
/// Cloneable so that one failed provider call can be handed to every
/// descriptor that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The endpoint rejected the credential
    #[error("credential rejected by '{endpoint}': {message}")]
    Auth { endpoint: String, message: String },

    /// The secret does not exist at the endpoint
    #[error("secret '{name}' not found at '{endpoint}'")]
    NotFound { endpoint: String, name: String },

    /// Network failure, timeout or unexpected response
    #[error("transient failure talking to '{endpoint}': {message}")]
    Transient { endpoint: String, message: String },
}

impl FetchError {
    pub fn auth(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub fn not_found(endpoint: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            endpoint: endpoint.into(),
            name: name.into(),
        }
    }

    pub fn transient(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Auth { .. } => ErrorKind::Auth,
            FetchError::NotFound { .. } => ErrorKind::NotFound,
            FetchError::Transient { .. } => ErrorKind::Transient,
        }
    }

    /// Only transient failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn endpoint(&self) -> &str {
        match self {
            FetchError::Auth { endpoint, .. }
            | FetchError::NotFound { endpoint, .. }
            | FetchError::Transient { endpoint, .. } => endpoint,
        }
    }
}
