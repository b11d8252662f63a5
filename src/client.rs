//! Client facade composing transport, retry, and pagination.

use std::time::Duration;

use futures_util::Stream;
use reqwest::Method;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::classify::ClassifierConfig;
use crate::error::ClientError;
use crate::graphql::{CursorPageInfo, GraphqlEnvelope, GraphqlRequest, JsonPath};
use crate::pagination::{GraphqlPage, RestPage, paginate_graphql, paginate_rest};
use crate::retry::{RetryPolicy, run_with_retry};
use crate::transport::{RawResponse, Request, Transport};

/// Default nodes requested per GraphQL page.
const DEFAULT_PAGE_SIZE: u32 = 100;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Default headers applied to every request.
    pub headers: HeaderMap,
    /// Request timeout.
    pub timeout: Duration,
    /// Retry policy.
    pub retry: RetryPolicy,
    /// Failure classifier configuration.
    pub classifier: ClassifierConfig,
    /// Default GraphQL page size.
    pub page_size: u32,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            headers: HeaderMap::new(),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            classifier: ClassifierConfig::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Client builder.
#[derive(Debug, Clone, Default)]
pub struct ApiClientBuilder {
    config: ApiClientConfig,
    cancel: Option<CancellationToken>,
}

impl ApiClientBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a default header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.config.headers.insert(name, value);
        self
    }

    /// Add a bearer token header.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl AsRef<str>) -> Self {
        let value = format!("Bearer {}", token.as_ref());
        if let Ok(header) = HeaderValue::from_str(&value) {
            self.config.headers.insert(AUTHORIZATION, header);
        }
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the failure classifier configuration.
    #[must_use]
    pub fn with_classifier_config(mut self, classifier: ClassifierConfig) -> Self {
        self.config.classifier = classifier;
        self
    }

    /// Set the default GraphQL page size.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: u32) -> Self {
        self.config.page_size = page_size;
        self
    }

    /// Attach an external cancellation token.
    #[must_use]
    pub fn with_cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<ApiClient, ClientError> {
        let transport = Transport::new(self.config.headers.clone(), self.config.timeout)?;
        Ok(ApiClient {
            transport,
            retry: self.config.retry,
            classifier: self.config.classifier,
            page_size: self.config.page_size,
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

/// Resilient migration API client.
///
/// Retries transient failures (transport-level and GraphQL-payload-level)
/// and walks multi-page result sets lazily. Does not interpret domain
/// semantics of responses.
#[derive(Debug, Clone)]
pub struct ApiClient {
    transport: Transport,
    retry: RetryPolicy,
    classifier: ClassifierConfig,
    page_size: u32,
    cancel: CancellationToken,
}

impl ApiClient {
    /// Create a client with default configuration.
    pub fn new() -> Result<Self, ClientError> {
        ApiClientBuilder::new().build()
    }

    /// The client's cancellation token.
    #[must_use]
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// GET a URL, returning the response body.
    pub async fn get(&self, url: &str) -> Result<String, ClientError> {
        let request = Request::new(Method::GET, url);
        self.send_retried(&request).await.map(|response| response.body)
    }

    /// GET a URL where `expected` is a legitimate outcome (existence
    /// checks). Returns the body on success or on the expected status;
    /// any other non-2xx status is an error.
    pub async fn get_expecting_non_success(
        &self,
        url: &str,
        expected: StatusCode,
    ) -> Result<String, ClientError> {
        let request = Request::new(Method::GET, url);
        run_with_retry(&self.retry, &self.classifier, &self.cancel, || {
            self.transport.send_expecting(&request, expected)
        })
        .await
        .map(|response| response.body)
    }

    /// POST a JSON body.
    pub async fn post(&self, url: &str, body: Value) -> Result<String, ClientError> {
        self.mutate(Method::POST, url, Some(body)).await
    }

    /// PUT a JSON body.
    pub async fn put(&self, url: &str, body: Value) -> Result<String, ClientError> {
        self.mutate(Method::PUT, url, Some(body)).await
    }

    /// PATCH a JSON body.
    pub async fn patch(&self, url: &str, body: Value) -> Result<String, ClientError> {
        self.mutate(Method::PATCH, url, Some(body)).await
    }

    /// DELETE a URL.
    pub async fn delete(&self, url: &str) -> Result<String, ClientError> {
        self.mutate(Method::DELETE, url, None).await
    }

    /// GET every element of a paged collection, following
    /// `Link: rel="next"` headers. Each page body must be a JSON array.
    ///
    /// Every page fetch is one retry-wrapped unit; a failure on page N does
    /// not re-fetch earlier pages. Each call starts from the first page.
    pub fn get_all_pages<'a>(
        &'a self,
        url: &str,
    ) -> impl Stream<Item = Result<Value, ClientError>> + 'a {
        paginate_rest(url.to_string(), move |page_url| async move {
            let request = Request::new(Method::GET, page_url);
            let response = self.send_retried(&request).await?;
            let items = parse_array_body(&response.body)?;
            Ok(RestPage {
                items,
                next_page: response.next_page,
            })
        })
    }

    /// POST a GraphQL request and return its `data` tree.
    ///
    /// A 200 response whose envelope carries `errors` counts as a failure:
    /// transient-pattern matches are retried like transport errors, anything
    /// else propagates with the first error's message.
    pub async fn post_graphql(
        &self,
        url: &str,
        request: &GraphqlRequest,
    ) -> Result<Value, ClientError> {
        let http_request =
            Request::new(Method::POST, url).with_body(serde_json::to_value(request)?);
        self.execute_graphql(&http_request).await
    }

    /// POST a GraphQL query and stream every node of its paginated
    /// connection.
    ///
    /// `first` and `after` are injected into the request's variables;
    /// `nodes_path` and `page_info_path` describe where in the `data` tree
    /// the node array and `pageInfo{hasNextPage,endCursor}` live. The page
    /// size is fixed for the whole fetch session.
    pub fn post_graphql_with_pagination<'a>(
        &'a self,
        url: &str,
        request: GraphqlRequest,
        nodes_path: JsonPath,
        page_info_path: JsonPath,
        page_size: Option<u32>,
    ) -> impl Stream<Item = Result<Value, ClientError>> + 'a {
        let url = url.to_string();
        let page_size = page_size.unwrap_or(self.page_size);
        paginate_graphql(move |cursor| {
            let body = paged_body(&request, page_size, cursor);
            let url = url.clone();
            let nodes_path = nodes_path.clone();
            let page_info_path = page_info_path.clone();
            async move {
                let http_request = Request::new(Method::POST, url).with_body(body?);
                let data = self.execute_graphql(&http_request).await?;
                let nodes = nodes_path
                    .resolve(&data)
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let page_info = page_info_path
                    .resolve(&data)
                    .map_or_else(CursorPageInfo::done, CursorPageInfo::from_value);
                Ok(GraphqlPage { nodes, page_info })
            }
        })
    }

    async fn mutate(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<String, ClientError> {
        let mut request = Request::new(method, url);
        if let Some(body) = body {
            request = request.with_body(body);
        }
        self.send_retried(&request).await.map(|response| response.body)
    }

    async fn send_retried(&self, request: &Request) -> Result<RawResponse, ClientError> {
        run_with_retry(&self.retry, &self.classifier, &self.cancel, || {
            self.transport.send(request)
        })
        .await
    }

    async fn execute_graphql(&self, request: &Request) -> Result<Value, ClientError> {
        run_with_retry(&self.retry, &self.classifier, &self.cancel, || async {
            let response = self.transport.send(request).await?;
            let envelope = GraphqlEnvelope::parse(&response.body)?;
            if !envelope.errors.is_empty() {
                return Err(ClientError::Graphql {
                    errors: envelope.errors,
                });
            }
            envelope.data.ok_or_else(|| ClientError::Protocol {
                message: "missing GraphQL data".to_string(),
            })
        })
        .await
    }
}

/// Build the per-page request body, injecting `first`/`after` into the
/// caller's variables. Variables must be a JSON object (or null) so the
/// cursor fields have somewhere to live.
fn paged_body(
    request: &GraphqlRequest,
    page_size: u32,
    cursor: Option<String>,
) -> Result<Value, ClientError> {
    let mut variables = match &request.variables {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => {
            return Err(ClientError::Protocol {
                message: format!("GraphQL variables must be a JSON object, got {other}"),
            });
        }
    };
    variables.insert("first".to_string(), Value::from(page_size));
    variables.insert(
        "after".to_string(),
        cursor.map_or(Value::Null, Value::String),
    );

    let mut body = serde_json::Map::new();
    body.insert("query".to_string(), Value::String(request.query.clone()));
    body.insert("variables".to_string(), Value::Object(variables));
    if let Some(name) = &request.operation_name {
        body.insert("operationName".to_string(), Value::String(name.clone()));
    }
    Ok(Value::Object(body))
}

fn parse_array_body(body: &str) -> Result<Vec<Value>, ClientError> {
    let value: Value = serde_json::from_str(body)?;
    match value {
        Value::Array(items) => Ok(items),
        _ => Err(ClientError::Protocol {
            message: "expected a JSON array page body".to_string(),
        }),
    }
}
