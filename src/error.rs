use std::time::Duration;
use thiserror::Error;

/// Failures talking to the call provider or its assistant API.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Provider event stream error: {0}")]
    Stream(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Reasons a call could not be started. Reported to the user, never retried.
#[derive(Error, Debug)]
pub enum CallStartError {
    #[error("No audio capture device is available")]
    NoCaptureDevice,

    #[error("A call is already in progress")]
    AlreadyActive,

    #[error("No assistant could be resolved: {0}")]
    AssistantUnavailable(String),

    #[error("Call provider rejected the session: {0}")]
    Rejected(#[source] ProviderError),

    #[error("Call provider did not answer within {0:?}")]
    Timeout(Duration),
}

/// The reconciled message list was empty.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No user input was captured during the call")]
pub struct NoUserInputError;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Call record '{call_id}' already exists")]
    DuplicateCall { call_id: String },

    #[error("Call record '{call_id}' not found for user '{user_id}'")]
    CallNotFound { user_id: String, call_id: String },

    #[error("Gave up updating '{key}' after {attempts} concurrent modifications")]
    Contended { key: String, attempts: usize },
}

#[derive(Error, Debug)]
pub enum KnowledgeError {
    #[error("Knowledge base request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Knowledge base returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_error_messages() {
        assert_eq!(CallStartError::NoCaptureDevice.to_string(), "No audio capture device is available");
        let rejected = CallStartError::Rejected(ProviderError::Status {
            status: 402,
            body: "insufficient credits".into(),
        });
        assert_eq!(
            rejected.to_string(),
            "Call provider rejected the session: Provider returned 402: insufficient credits"
        );
        assert!(std::error::Error::source(&rejected).is_some());
    }

    #[test]
    fn persistence_not_found_message() {
        let err = PersistenceError::CallNotFound {
            user_id: "u1".into(),
            call_id: "c1".into(),
        };
        assert_eq!(err.to_string(), "Call record 'c1' not found for user 'u1'");
    }
}
