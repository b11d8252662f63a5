//! Error types for the migration API client.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// HTTP error information captured from reqwest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpErrorInfo {
    /// Error message.
    pub message: String,
    /// HTTP status code (if available).
    pub status_code: Option<u16>,
    /// Whether the error was a timeout.
    pub is_timeout: bool,
    /// Whether the error was a connection failure.
    pub is_connect: bool,
}

impl From<reqwest::Error> for HttpErrorInfo {
    fn from(err: reqwest::Error) -> Self {
        Self {
            message: err.to_string(),
            status_code: err.status().map(|status| status.as_u16()),
            is_timeout: err.is_timeout(),
            is_connect: err.is_connect(),
        }
    }
}

/// GraphQL error location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphqlErrorLocation {
    /// Line number in the query (1-based).
    pub line: u32,
    /// Column number in the query (1-based).
    pub column: u32,
}

/// GraphQL path segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GraphqlPathSegment {
    /// Field name.
    Key(String),
    /// Array index.
    Index(i64),
}

/// GraphQL error (per GraphQL spec).
///
/// `message` may be absent on malformed backends; callers should go through
/// [`first_graphql_message`] rather than reading it directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphqlError {
    /// Error classification as reported by the server.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Human-readable error message.
    #[serde(default)]
    pub message: Option<String>,
    /// Location(s) within the query.
    #[serde(default)]
    pub locations: Vec<GraphqlErrorLocation>,
    /// Path within the response where the error occurred.
    #[serde(default)]
    pub path: Vec<GraphqlPathSegment>,
}

/// Extract the first error's message, falling back to `"UNKNOWN"`.
#[must_use]
pub fn first_graphql_message(errors: &[GraphqlError]) -> &str {
    errors
        .first()
        .and_then(|err| err.message.as_deref())
        .unwrap_or("UNKNOWN")
}

/// Error type for migration API client operations.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// HTTP/network error without a server response.
    #[error("HTTP error: {}", .0.message)]
    Http(HttpErrorInfo),

    /// Non-2xx HTTP response.
    #[error("HTTP status {status} from {url}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: StatusCode,
        /// Request URL.
        url: String,
        /// Response body (truncated if needed).
        body: String,
    },

    /// The server answered a non-2xx status other than the one the caller
    /// declared expected.
    #[error("expected status {expected} from {url}, got {actual}: {body}")]
    UnexpectedStatus {
        /// Status the caller declared acceptable.
        expected: StatusCode,
        /// Status actually returned.
        actual: StatusCode,
        /// Request URL.
        url: String,
        /// Response body (truncated if needed).
        body: String,
    },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(String),

    /// GraphQL-level errors returned inside a 200 envelope.
    #[error("GraphQL error: {}", first_graphql_message(.errors))]
    Graphql {
        /// GraphQL error list.
        errors: Vec<GraphqlError>,
    },

    /// Protocol violation (missing data, non-array page body, ...).
    #[error("protocol error: {message}")]
    Protocol {
        /// Details.
        message: String,
    },

    /// The operation was cancelled via the client's cancellation token.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(HttpErrorInfo::from(err))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}
