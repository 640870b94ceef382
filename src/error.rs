//! Error types surfaced by registration, startup, and rendering.

use std::path::PathBuf;
use thiserror::Error;

/// A stub definition was rejected at registration time.
///
/// The registry is left unchanged when one of these is returned.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("conflicting URL matchers: only one of {0} may be set")]
    ConflictingUrlMatchers(String),

    #[error("invalid regex `{pattern}`: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid JSON path `{expression}`: {reason}")]
    InvalidJsonPath { expression: String, reason: String },

    #[error("invalid XPath `{expression}`: {reason}")]
    InvalidXPath { expression: String, reason: String },

    #[error("invalid status code: {0}")]
    InvalidStatus(u16),

    #[error("invalid status message `{0}`")]
    InvalidStatusMessage(String),

    #[error("invalid response header `{0}`")]
    InvalidHeader(String),

    #[error("invalid response body: {0}")]
    InvalidBody(String),
}

/// Listener lifecycle failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),

    #[error("failed to register stub from configuration: {0}")]
    Registration(#[from] RegistrationError),
}

impl ServerError {
    pub(crate) fn bind(address: impl Into<String>, source: std::io::Error) -> Self {
        ServerError::Bind {
            address: address.into(),
            source,
        }
    }
}

/// Failure to materialize a single response. Fails the request, not the server.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("body file {path} could not be read: {source}")]
    MissingBodyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("body file {0} is outside the stub files root")]
    BodyFileOutsideRoot(PathBuf),

    #[error("invalid base64 body: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("template rendering failed: {0}")]
    Template(#[from] handlebars::RenderError),

    #[error("JSON body serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}
