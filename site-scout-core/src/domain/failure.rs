use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a failed remote call.
///
/// Decides whether a retry is attempted and which delay formula applies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Timeout,
    ServerError,
    RateLimit,
    PermanentClientError,
    Unknown,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorClass::PermanentClientError)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Timeout => "timeout",
            ErrorClass::ServerError => "server_error",
            ErrorClass::RateLimit => "rate_limit",
            ErrorClass::PermanentClientError => "permanent_client_error",
            ErrorClass::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded on a failed collection outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceFailure {
    pub class: ErrorClass,
    pub message: String,
    pub attempts: u32,
}

impl SourceFailure {
    pub fn new(class: ErrorClass, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            class,
            message: message.into(),
            attempts,
        }
    }
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} attempt(s): {}",
            self.class, self.attempts, self.message
        )
    }
}
