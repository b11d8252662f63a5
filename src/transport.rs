//! Single-request HTTP transport.
//!
//! Intentionally dumb: no retry, no pagination. One call maps to one HTTP
//! round trip so the layer stays mockable in isolation.

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, LINK};
use reqwest::{Method, StatusCode};
use tracing::debug;

use crate::error::ClientError;

/// An immutable request description.
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method.
    pub method: Method,
    /// Absolute request URL.
    pub url: String,
    /// Optional JSON body.
    pub body: Option<serde_json::Value>,
    /// Extra headers merged over the client defaults.
    pub headers: HeaderMap,
}

impl Request {
    /// Create a new request.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach a header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Raw response from one attempt. Not retained beyond that attempt.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: StatusCode,
    /// Response body text.
    pub body: String,
    /// Target of the `Link: rel="next"` header, when present.
    pub next_page: Option<String>,
}

/// HTTP transport over a shared reqwest client.
#[derive(Debug, Clone)]
pub struct Transport {
    http: reqwest::Client,
}

impl Transport {
    /// Build a transport with default headers and a request timeout.
    pub fn new(mut headers: HeaderMap, timeout: Duration) -> Result<Self, ClientError> {
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self { http })
    }

    /// Send one request; any non-2xx status maps to [`ClientError::HttpStatus`].
    pub async fn send(&self, request: &Request) -> Result<RawResponse, ClientError> {
        let response = self.send_raw(request).await?;
        if !response.status.is_success() {
            return Err(ClientError::HttpStatus {
                status: response.status,
                url: request.url.clone(),
                body: truncate_body(&response.body),
            });
        }
        Ok(response)
    }

    /// Send one request, treating `expected` as a normal outcome.
    ///
    /// Used for existence checks: a 404 the caller asked about is not an
    /// error, but any other non-2xx status escalates.
    pub async fn send_expecting(
        &self,
        request: &Request,
        expected: StatusCode,
    ) -> Result<RawResponse, ClientError> {
        let response = self.send_raw(request).await?;
        if response.status.is_success() || response.status == expected {
            return Ok(response);
        }
        Err(ClientError::UnexpectedStatus {
            expected,
            actual: response.status,
            url: request.url.clone(),
            body: truncate_body(&response.body),
        })
    }

    async fn send_raw(&self, request: &Request) -> Result<RawResponse, ClientError> {
        if request.body.is_some() {
            debug!(method = %request.method, url = %request.url, "sending request (body redacted)");
        } else {
            debug!(method = %request.method, url = %request.url, "sending request");
        }

        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;

        let status = response.status();
        let next_page = parse_link_next(response.headers());
        let body = response.text().await?;
        Ok(RawResponse {
            status,
            body,
            next_page,
        })
    }
}

/// Extract the `rel="next"` target from a `Link` header.
fn parse_link_next(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(LINK)?.to_str().ok()?;
    for part in value.split(',') {
        let mut sections = part.split(';');
        let target = sections.next().unwrap_or("").trim();
        let is_next = sections.any(|section| {
            let section = section.trim();
            section == "rel=\"next\"" || section == "rel=next"
        });
        if is_next && target.starts_with('<') && target.ends_with('>') {
            return Some(target[1..target.len() - 1].to_string());
        }
    }
    None
}

fn truncate_body(body: &str) -> String {
    const MAX_LEN: usize = 4096;
    if body.len() <= MAX_LEN {
        return body.to_string();
    }
    // Floor the cut to a char boundary: byte 4096 may fall inside a
    // multibyte character.
    let mut cut = MAX_LEN;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut truncated = body[..cut].to_string();
    truncated.push('…');
    truncated
}
