//! Resilient client layer for migration-oriented APIs.
//!
//! This crate provides:
//! - Failure classification: permanent errors propagate immediately,
//!   transient ones (including HTTP 200 responses carrying transient
//!   GraphQL errors) are retried with bounded backoff.
//! - A dumb single-request transport over reqwest.
//! - Lazy pagination over REST `Link: rel="next"` chains and GraphQL
//!   cursor connections, composed with retry per page.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::doc_markdown)]

mod classify;
mod client;
mod error;
mod graphql;
mod pagination;
mod retry;
mod transport;

pub use classify::{ClassifierConfig, ErrorClass, RetryableEndpoint, classify};
pub use client::{ApiClient, ApiClientBuilder, ApiClientConfig};
pub use error::{
    ClientError, GraphqlError, GraphqlErrorLocation, GraphqlPathSegment, HttpErrorInfo,
    first_graphql_message,
};
pub use graphql::{CursorPageInfo, GraphqlEnvelope, GraphqlRequest, JsonPath};
pub use pagination::{GraphqlPage, RestPage, paginate_graphql, paginate_rest};
pub use retry::{RetryContext, RetryDecision, RetryPolicy, run_with_retry};
pub use transport::{RawResponse, Request, Transport};
