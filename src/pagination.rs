//! Lazy pagination over REST and GraphQL endpoints.
//!
//! Both helpers are stateless sequence producers: every call builds a fresh
//! stream with its own cursor state, so re-invoking a fetch always restarts
//! from the first page and concurrent fetch sequences never share cursors.

use std::future::Future;

use async_stream::try_stream;
use futures_util::Stream;
use serde_json::Value;

use crate::error::ClientError;
use crate::graphql::CursorPageInfo;

/// One fetched REST page.
#[derive(Debug, Clone)]
pub struct RestPage {
    /// Elements of the page's JSON array body.
    pub items: Vec<Value>,
    /// URL of the next page, from the `Link: rel="next"` header.
    pub next_page: Option<String>,
}

/// One fetched GraphQL page.
#[derive(Debug, Clone)]
pub struct GraphqlPage {
    /// Extracted connection nodes.
    pub nodes: Vec<Value>,
    /// Extracted `pageInfo`.
    pub page_info: CursorPageInfo,
}

/// Stream every element of a `Link`-chained REST collection.
///
/// `fetch_page` is invoked once per page (each invocation is expected to be
/// one retry-wrapped unit); a failure on page N surfaces without re-fetching
/// earlier pages.
pub fn paginate_rest<F, Fut>(
    first_url: String,
    mut fetch_page: F,
) -> impl Stream<Item = Result<Value, ClientError>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<RestPage, ClientError>>,
{
    try_stream! {
        let mut next = Some(first_url);
        while let Some(url) = next.take() {
            let page = fetch_page(url).await?;
            next = page.next_page;
            for item in page.items {
                yield item;
            }
        }
    }
}

/// Stream every node of a cursor-paginated GraphQL connection.
///
/// `fetch_page` receives the `after` cursor (None for the first page) and
/// returns the page's nodes plus `pageInfo`. The stream terminates on
/// `hasNextPage=false` or a page that advertises more data without an end
/// cursor to reach it.
pub fn paginate_graphql<F, Fut>(
    mut fetch_page: F,
) -> impl Stream<Item = Result<Value, ClientError>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<GraphqlPage, ClientError>>,
{
    try_stream! {
        let mut cursor: Option<String> = None;
        loop {
            let page = fetch_page(cursor.take()).await?;
            let CursorPageInfo {
                has_next_page,
                end_cursor,
            } = page.page_info;
            for node in page.nodes {
                yield node;
            }
            if !has_next_page {
                break;
            }
            match end_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
    }
}
