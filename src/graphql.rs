//! GraphQL wire types and response-tree extraction.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ClientError, GraphqlError};

/// GraphQL request payload.
///
/// Serializes to the standard `{"query", "variables", "operationName"}`
/// shape. Variables are untyped JSON here because the pagination layer
/// injects `first`/`after` into them at fetch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphqlRequest {
    /// Query text.
    pub query: String,
    /// Variables object.
    #[serde(default)]
    pub variables: Value,
    /// Optional operation name.
    #[serde(rename = "operationName", skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
}

impl GraphqlRequest {
    /// Create a new request with empty variables.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: Value::Object(serde_json::Map::new()),
            operation_name: None,
        }
    }

    /// Attach variables.
    #[must_use]
    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = variables;
        self
    }

    /// Attach an operation name.
    #[must_use]
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }
}

/// GraphQL response envelope.
///
/// `data` may be null when `errors` is non-empty, and `errors` may be present
/// alongside partial `data`. Check `errors` before trusting `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphqlEnvelope {
    /// Response data tree.
    #[serde(default)]
    pub data: Option<Value>,
    /// GraphQL errors.
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
}

impl GraphqlEnvelope {
    /// Parse an envelope from a response body.
    pub fn parse(body: &str) -> Result<Self, ClientError> {
        Ok(serde_json::from_str(body)?)
    }
}

/// Cursor page info extracted from a `pageInfo` object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorPageInfo {
    /// Whether there is another page.
    pub has_next_page: bool,
    /// Cursor for the next page.
    pub end_cursor: Option<String>,
}

impl CursorPageInfo {
    /// Terminal page info: no further pages.
    #[must_use]
    pub const fn done() -> Self {
        Self {
            has_next_page: false,
            end_cursor: None,
        }
    }

    /// Read `{hasNextPage, endCursor}` out of a JSON object.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        Self {
            has_next_page: value
                .get("hasNextPage")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            end_cursor: value
                .get("endCursor")
                .and_then(Value::as_str)
                .map(ToString::to_string),
        }
    }
}

/// Path of field names into a JSON tree.
///
/// Different queries nest their connection at different depths, so callers
/// describe where the node array and `pageInfo` live instead of the client
/// knowing every query's shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    segments: Vec<String>,
}

impl JsonPath {
    /// Build a path from field names, outermost first.
    #[must_use]
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Walk the path from `root`, returning the value it lands on.
    #[must_use]
    pub fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(root, |node, key| node.get(key))
    }
}
