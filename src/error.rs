//! Error types for the Salesforce Apex client

use std::io;

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::transport::Method;

/// Result type alias for the Salesforce Apex client
pub type Result<T> = std::result::Result<T, Error>;

/// Salesforce Apex client errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection name not present in the configuration
    #[error("Salesforce connection [{0}] not configured")]
    ConnectionNotFound(String),

    /// Token issuance failed or returned an invalid token
    #[error("Failed to obtain Salesforce token (HTTP {status}): {body}")]
    Auth {
        /// HTTP status of the token response (500 when no response was obtained)
        status: u16,
        /// Raw token response body, kept for diagnostics
        body: String,
    },

    /// Non-2xx response from the Apex API
    #[error("Salesforce API error {}: {}", .0.status, .0.message)]
    Api(Box<ApiFailure>),

    /// HTTP transport error (connection failure, timeout)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Full request/response context for a failed Apex API call.
///
/// Carried inside [`Error::Api`] so callers can turn a failure into an
/// API response without re-deriving any of it.
#[derive(Debug, Clone, Serialize)]
pub struct ApiFailure {
    /// HTTP status of the failed response
    pub status: u16,
    /// Parsed error message (`message` field of the response JSON when present)
    pub message: String,
    /// HTTP method of the failed request
    pub method: Method,
    /// Full request URL
    pub url: String,
    /// Request payload, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Parsed response body (raw string fallback when not JSON)
    pub response: Value,
    /// Caller-supplied request context, if set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
}

/// Caller-supplied metadata identifying the inbound request on whose
/// behalf the Apex call is made. Attached to failure context and logs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestContext {
    /// Request path or URI
    pub uri: String,
    /// Route name, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Handler action, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl Error {
    /// HTTP status code best describing this error.
    ///
    /// Statuses outside the valid HTTP range map to 500.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        let code = match self {
            Self::Api(failure) => failure.status,
            Self::Auth { status, .. } => *status,
            Self::Http(e) => e.status().map_or(502, |s| s.as_u16()),
            _ => 500,
        };
        if (100..600).contains(&code) { code } else { 500 }
    }

    /// Structured JSON body for surfacing this error through an API response.
    #[must_use]
    pub fn to_response_body(&self) -> Value {
        let context = match self {
            Self::Api(failure) => serde_json::to_value(failure).unwrap_or(Value::Null),
            Self::Auth { body, .. } => json!({ "response": body }),
            _ => Value::Null,
        };

        json!({
            "message": self.to_string(),
            "code": self.status_code(),
            "context": context,
        })
    }
}
