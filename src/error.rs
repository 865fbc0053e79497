//! Error taxonomy for the connection layer.

use thiserror::Error;

use crate::response::Response;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid settings detected before any call is attempted.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The OAuth token could not be obtained.
    #[error("credential error: {0}")]
    Credential(String),

    /// The request never produced an HTTP response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded into a tree.
    #[error("parse error: {0}")]
    Parse(String),

    /// Aggregated transport and payload errors for a completed call.
    ///
    /// Carries the full response so callers can still inspect it.
    #[error("{message}")]
    Response {
        message: String,
        response: Box<Response>,
    },
}

impl Error {
    /// Returns the response attached to a [`Error::Response`], if any.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Error::Response { response, .. } => Some(response),
            _ => None,
        }
    }
}
