use std::fmt;

use serde_json::Value;

#[derive(Debug)]
pub enum Error {
    /// Installation key material failed validation.
    Validation(String),
    /// Sign-in, refresh or registration was rejected by the cloud.
    Auth { status: u16, payload: Value },
    /// An authenticated API call was rejected.
    Api { status: u16, payload: Value },
    /// No response was received.
    Transport(reqwest::Error),
    /// A success response whose body could not be decoded.
    Json(serde_json::Error),
}

impl Error {
    /// HTTP status of a rejected exchange, if a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Auth { status, .. } | Error::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Parsed response body of a rejected exchange.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Error::Auth { payload, .. } | Error::Api { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(msg) => write!(f, "Invalid installation key: {}", msg),
            Error::Auth { status, payload } => {
                write!(f, "Authentication failed (HTTP {}): {}", status, payload)
            }
            Error::Api { status, payload } => {
                write!(f, "API request failed (HTTP {}): {}", status, payload)
            }
            Error::Transport(err) => write!(f, "HTTP error: {}", err),
            Error::Json(err) => write!(f, "JSON parsing error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(err) => Some(err),
            Error::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
