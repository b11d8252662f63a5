//! Failure classification consumed by the retry engine.
//!
//! Retry-worthiness is a function of payload content, not just transport
//! status: an HTTP 200 carrying a transient GraphQL error classifies exactly
//! like a 503.

use reqwest::StatusCode;

use crate::error::ClientError;

/// Classification outcome for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected to resolve on retry without caller intervention.
    Retryable,
    /// Will not resolve by retrying; propagate immediately.
    Permanent,
}

/// A client-error status treated as transient for one specific endpoint.
///
/// Some mutations (group-membership updates, notably) intermittently answer
/// 400 and succeed on the next attempt. The set is configuration, not
/// hardcoded knowledge, since it grows as flaky endpoints are discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryableEndpoint {
    /// Status code to downgrade from permanent to retryable.
    pub status: u16,
    /// Substring the request URL must contain.
    pub url_fragment: String,
}

/// Classifier configuration.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Case-insensitive substrings of GraphQL error messages that signal a
    /// transient backend failure.
    pub transient_message_patterns: Vec<String>,
    /// Endpoint-scoped exceptions for otherwise-permanent client statuses.
    pub retryable_endpoints: Vec<RetryableEndpoint>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            transient_message_patterns: vec![
                "unavailable".to_string(),
                "something went wrong".to_string(),
            ],
            retryable_endpoints: Vec::new(),
        }
    }
}

impl ClassifierConfig {
    fn matches_transient_pattern(&self, message: &str) -> bool {
        let message = message.to_ascii_lowercase();
        self.transient_message_patterns
            .iter()
            .any(|pattern| message.contains(&pattern.to_ascii_lowercase()))
    }

    fn is_retryable_endpoint(&self, status: StatusCode, url: &str) -> bool {
        self.retryable_endpoints
            .iter()
            .any(|entry| entry.status == status.as_u16() && url.contains(&entry.url_fragment))
    }
}

/// Classify a failed attempt. Rules are checked in order; first match wins.
#[must_use]
pub fn classify(error: &ClientError, config: &ClassifierConfig) -> ErrorClass {
    match error {
        // Network-level failure without a server response.
        ClientError::Http(info) => match info.status_code {
            None => ErrorClass::Retryable,
            Some(code) => StatusCode::from_u16(code)
                .map_or(ErrorClass::Permanent, |status| {
                    classify_status(status, "", config)
                }),
        },
        ClientError::HttpStatus { status, url, .. } => classify_status(*status, url, config),
        ClientError::Graphql { errors } => {
            let transient = errors.iter().any(|err| {
                err.message
                    .as_deref()
                    .is_some_and(|message| config.matches_transient_pattern(message))
            });
            if transient {
                ErrorClass::Retryable
            } else {
                ErrorClass::Permanent
            }
        }
        _ => ErrorClass::Permanent,
    }
}

fn classify_status(status: StatusCode, url: &str, config: &ClassifierConfig) -> ErrorClass {
    match status {
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            ErrorClass::Retryable
        }
        // 404 stays permanent: callers interpret not-found as a terminal
        // state (existence checks go through `get_expecting_non_success`).
        _ if config.is_retryable_endpoint(status, url) => ErrorClass::Retryable,
        _ => ErrorClass::Permanent,
    }
}
