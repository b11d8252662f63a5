use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::TryStreamExt;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use migration_client::{
    ApiClient, ApiClientBuilder, ClassifierConfig, ClientError, GraphqlRequest, JsonPath,
    RetryPolicy, RetryableEndpoint,
};

const TEAMS_QUERY: &str =
    "query Teams($org: String!, $first: Int!, $after: String) { organization(login: $org) { teams(first: $first, after: $after) { nodes { name } pageInfo { hasNextPage endCursor } } } }";

fn test_client() -> ApiClient {
    ApiClientBuilder::new()
        .with_retry_policy(RetryPolicy::immediate(3))
        .build()
        .expect("client")
}

struct SequenceResponder {
    counter: Arc<AtomicUsize>,
    failures: usize,
    failure: ResponseTemplate,
    success: ResponseTemplate,
}

impl Respond for SequenceResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let attempt = self.counter.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            self.failure.clone()
        } else {
            self.success.clone()
        }
    }
}

struct CountingResponder {
    counter: Arc<AtomicUsize>,
    template: ResponseTemplate,
}

impl Respond for CountingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.counter.fetch_add(1, Ordering::SeqCst);
        self.template.clone()
    }
}

/// Serves a two-page teams connection, recording every request body.
struct PagedGraphqlResponder {
    bodies: Arc<Mutex<Vec<Value>>>,
}

impl Respond for PagedGraphqlResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).expect("request body json");
        let first_page = body["variables"]["after"].is_null();
        self.bodies.lock().expect("bodies lock").push(body);

        if first_page {
            ResponseTemplate::new(200).set_body_json(json!({
                "data": {"organization": {"teams": {
                    "nodes": [{"name": "alpha"}, {"name": "beta"}],
                    "pageInfo": {"hasNextPage": true, "endCursor": "c1"}
                }}}
            }))
        } else {
            ResponseTemplate::new(200).set_body_json(json!({
                "data": {"organization": {"teams": {
                    "nodes": [{"name": "gamma"}],
                    "pageInfo": {"hasNextPage": false, "endCursor": null}
                }}}
            }))
        }
    }
}

#[tokio::test]
async fn permanent_status_short_circuits_retries() {
    let server = MockServer::start().await;
    let counter = Arc::new(AtomicUsize::new(0));

    Mock::given(method("GET"))
        .and(path("/repos/missing"))
        .respond_with(CountingResponder {
            counter: counter.clone(),
            template: ResponseTemplate::new(404).set_body_string("not found"),
        })
        .mount(&server)
        .await;

    let client = test_client();
    let err = client
        .get(&format!("{}/repos/missing", server.uri()))
        .await
        .expect_err("404 should be permanent");

    assert!(matches!(
        err,
        ClientError::HttpStatus {
            status: StatusCode::NOT_FOUND,
            ..
        }
    ));
    assert_eq!(counter.load(Ordering::SeqCst), 1, "expected exactly one call");
}

#[tokio::test]
async fn retryable_status_eventually_succeeds() {
    let server = MockServer::start().await;
    let counter = Arc::new(AtomicUsize::new(0));

    Mock::given(method("GET"))
        .and(path("/migrations/1"))
        .respond_with(SequenceResponder {
            counter: counter.clone(),
            failures: 2,
            failure: ResponseTemplate::new(503),
            success: ResponseTemplate::new(200).set_body_string("{\"state\":\"exported\"}"),
        })
        .mount(&server)
        .await;

    let client = test_client();
    let body = client
        .get(&format!("{}/migrations/1", server.uri()))
        .await
        .expect("should succeed on third attempt");

    assert_eq!(body, "{\"state\":\"exported\"}");
    assert_eq!(counter.load(Ordering::SeqCst), 3, "expected three calls");
}

#[tokio::test]
async fn oversized_multibyte_error_body_is_truncated_not_fatal() {
    let server = MockServer::start().await;

    // 4098 bytes of 3-byte characters: the truncation cut falls inside a
    // character.
    Mock::given(method("GET"))
        .and(path("/migrations/huge"))
        .respond_with(ResponseTemplate::new(500).set_body_string("\u{2026}".repeat(1366)))
        .mount(&server)
        .await;

    let client = test_client();
    let err = client
        .get(&format!("{}/migrations/huge", server.uri()))
        .await
        .expect_err("500 is an error");

    match err {
        ClientError::HttpStatus { status, body, .. } => {
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert!(body.len() <= 4096 + '\u{2026}'.len_utf8());
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn retries_exhausted_surfaces_last_failure() {
    let server = MockServer::start().await;
    let counter = Arc::new(AtomicUsize::new(0));

    Mock::given(method("GET"))
        .and(path("/migrations/2"))
        .respond_with(CountingResponder {
            counter: counter.clone(),
            template: ResponseTemplate::new(502),
        })
        .mount(&server)
        .await;

    let client = ApiClientBuilder::new()
        .with_retry_policy(RetryPolicy::immediate(2))
        .build()
        .expect("client");
    let err = client
        .get(&format!("{}/migrations/2", server.uri()))
        .await
        .expect_err("should exhaust retries");

    assert!(matches!(
        err,
        ClientError::HttpStatus {
            status: StatusCode::BAD_GATEWAY,
            ..
        }
    ));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn allow_listed_bad_request_is_retried() {
    let server = MockServer::start().await;
    let counter = Arc::new(AtomicUsize::new(0));

    Mock::given(method("PUT"))
        .and(path("/teams/movers/members/hubot"))
        .respond_with(SequenceResponder {
            counter: counter.clone(),
            failures: 1,
            failure: ResponseTemplate::new(400).set_body_string("flaky"),
            success: ResponseTemplate::new(200).set_body_string("{}"),
        })
        .mount(&server)
        .await;

    let client = ApiClientBuilder::new()
        .with_retry_policy(RetryPolicy::immediate(3))
        .with_classifier_config(ClassifierConfig {
            retryable_endpoints: vec![RetryableEndpoint {
                status: 400,
                url_fragment: "/members/".to_string(),
            }],
            ..ClassifierConfig::default()
        })
        .build()
        .expect("client");

    let body = client
        .put(
            &format!("{}/teams/movers/members/hubot", server.uri()),
            json!({"role": "member"}),
        )
        .await
        .expect("should succeed after one retry");

    assert_eq!(body, "{}");
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn expected_non_success_returns_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orgs/acme/teams/absent"))
        .respond_with(ResponseTemplate::new(404).set_body_string("{\"message\":\"Not Found\"}"))
        .mount(&server)
        .await;

    let client = test_client();
    let body = client
        .get_expecting_non_success(
            &format!("{}/orgs/acme/teams/absent", server.uri()),
            StatusCode::NOT_FOUND,
        )
        .await
        .expect("404 was declared expected");

    assert_eq!(body, "{\"message\":\"Not Found\"}");
}

#[tokio::test]
async fn unexpected_non_success_escalates() {
    let server = MockServer::start().await;
    let counter = Arc::new(AtomicUsize::new(0));

    Mock::given(method("GET"))
        .and(path("/orgs/acme/teams/secret"))
        .respond_with(CountingResponder {
            counter: counter.clone(),
            template: ResponseTemplate::new(401).set_body_string("bad credentials"),
        })
        .mount(&server)
        .await;

    let client = test_client();
    let err = client
        .get_expecting_non_success(
            &format!("{}/orgs/acme/teams/secret", server.uri()),
            StatusCode::NOT_FOUND,
        )
        .await
        .expect_err("401 was not the expected status");

    assert!(matches!(
        err,
        ClientError::UnexpectedStatus {
            expected: StatusCode::NOT_FOUND,
            actual: StatusCode::UNAUTHORIZED,
            ..
        }
    ));
    assert_eq!(counter.load(Ordering::SeqCst), 1, "401 is permanent");
}

#[tokio::test]
async fn rest_pagination_follows_link_headers() {
    let server = MockServer::start().await;

    // Mount the page-2 mock first: wiremock picks the first matching mock
    // and the bare path matcher would otherwise swallow the query.
    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 3}, {"id": 4}])))
        .mount(&server)
        .await;

    let next = format!("<{}/orgs/acme/repos?page=2>; rel=\"next\"", server.uri());
    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Link", next.as_str())
                .set_body_json(json!([{"id": 1}, {"id": 2}])),
        )
        .mount(&server)
        .await;

    let client = test_client();
    let url = format!("{}/orgs/acme/repos", server.uri());
    let items: Vec<Value> = client
        .get_all_pages(&url)
        .try_collect()
        .await
        .expect("pagination should succeed");

    assert_eq!(
        items,
        vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3}), json!({"id": 4})]
    );

    // Re-running the same fetch yields the same sequence: cursor state is
    // per-stream, never shared.
    let again: Vec<Value> = client
        .get_all_pages(&url)
        .try_collect()
        .await
        .expect("second run should succeed");
    assert_eq!(again, items);
}

#[tokio::test]
async fn rest_pagination_retries_first_page() {
    let server = MockServer::start().await;
    let counter = Arc::new(AtomicUsize::new(0));

    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .respond_with(SequenceResponder {
            counter: counter.clone(),
            failures: 1,
            failure: ResponseTemplate::new(503),
            success: ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])),
        })
        .mount(&server)
        .await;

    let client = test_client();
    let items: Vec<Value> = client
        .get_all_pages(&format!("{}/orgs/acme/repos", server.uri()))
        .try_collect()
        .await
        .expect("first page fetch is one retry-wrapped unit");

    assert_eq!(items, vec![json!({"id": 1})]);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn graphql_pagination_threads_cursor() {
    let server = MockServer::start().await;
    let bodies = Arc::new(Mutex::new(Vec::new()));

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(PagedGraphqlResponder {
            bodies: bodies.clone(),
        })
        .mount(&server)
        .await;

    let client = test_client();
    let request = GraphqlRequest::new(TEAMS_QUERY)
        .with_variables(json!({"org": "acme"}))
        .with_operation_name("Teams");

    let nodes: Vec<Value> = client
        .post_graphql_with_pagination(
            &format!("{}/graphql", server.uri()),
            request,
            JsonPath::new(["organization", "teams", "nodes"]),
            JsonPath::new(["organization", "teams", "pageInfo"]),
            Some(2),
        )
        .try_collect()
        .await
        .expect("pagination should succeed");

    assert_eq!(
        nodes,
        vec![
            json!({"name": "alpha"}),
            json!({"name": "beta"}),
            json!({"name": "gamma"})
        ]
    );

    let bodies = bodies.lock().expect("bodies lock");
    assert_eq!(bodies.len(), 2, "expected two pages");
    assert_eq!(bodies[0]["variables"]["after"], Value::Null);
    assert_eq!(bodies[0]["variables"]["first"], 2);
    assert_eq!(bodies[1]["variables"]["after"], "c1");
    assert_eq!(bodies[1]["variables"]["org"], "acme");
    assert_eq!(bodies[0]["query"], bodies[1]["query"]);
}

#[tokio::test]
async fn graphql_transient_errors_are_retried() {
    let server = MockServer::start().await;
    let counter = Arc::new(AtomicUsize::new(0));

    let transient = ResponseTemplate::new(200).set_body_json(json!({
        "data": null,
        "errors": [{"type": "SERVICE_UNAVAILABLE", "message": "Something went wrong while executing your query"}]
    }));
    let success = ResponseTemplate::new(200).set_body_json(json!({
        "data": {"organization": {"id": "org-1"}}
    }));

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(SequenceResponder {
            counter: counter.clone(),
            failures: 2,
            failure: transient,
            success,
        })
        .mount(&server)
        .await;

    let client = test_client();
    let data = client
        .post_graphql(
            &format!("{}/graphql", server.uri()),
            &GraphqlRequest::new("query { organization { id } }"),
        )
        .await
        .expect("transient GraphQL errors should be retried");

    assert_eq!(data["organization"]["id"], "org-1");
    assert_eq!(counter.load(Ordering::SeqCst), 3, "expected three POSTs");
}

#[tokio::test]
async fn graphql_permanent_error_propagates_message() {
    let server = MockServer::start().await;
    let counter = Arc::new(AtomicUsize::new(0));

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(CountingResponder {
            counter: counter.clone(),
            template: ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [{"type": "FORBIDDEN", "message": "Resource not accessible by integration"}]
            })),
        })
        .mount(&server)
        .await;

    let client = test_client();
    let err = client
        .post_graphql(
            &format!("{}/graphql", server.uri()),
            &GraphqlRequest::new("query { organization { id } }"),
        )
        .await
        .expect_err("permanent GraphQL error");

    assert_eq!(
        err.to_string(),
        "GraphQL error: Resource not accessible by integration"
    );
    assert_eq!(counter.load(Ordering::SeqCst), 1, "no retry for permanent");
}

#[tokio::test]
async fn graphql_error_on_second_page_stops_stream() {
    let server = MockServer::start().await;
    let pages = Arc::new(AtomicUsize::new(0));
    let pages_clone = pages.clone();

    struct FailSecondPage {
        pages: Arc<AtomicUsize>,
    }

    impl Respond for FailSecondPage {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body: Value = serde_json::from_slice(&request.body).expect("request body json");
            self.pages.fetch_add(1, Ordering::SeqCst);
            if body["variables"]["after"].is_null() {
                ResponseTemplate::new(200).set_body_json(json!({
                    "data": {"organization": {"teams": {
                        "nodes": [{"name": "alpha"}],
                        "pageInfo": {"hasNextPage": true, "endCursor": "c1"}
                    }}}
                }))
            } else {
                ResponseTemplate::new(200).set_body_json(json!({
                    "data": null,
                    "errors": [{"message": "Field 'teams' doesn't exist"}]
                }))
            }
        }
    }

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(FailSecondPage { pages: pages_clone })
        .mount(&server)
        .await;

    let client = test_client();
    let result: Result<Vec<Value>, ClientError> = client
        .post_graphql_with_pagination(
            &format!("{}/graphql", server.uri()),
            GraphqlRequest::new(TEAMS_QUERY).with_variables(json!({"org": "acme"})),
            JsonPath::new(["organization", "teams", "nodes"]),
            JsonPath::new(["organization", "teams", "pageInfo"]),
            None,
        )
        .try_collect()
        .await;

    assert!(matches!(result, Err(ClientError::Graphql { .. })));
    assert_eq!(
        pages.load(Ordering::SeqCst),
        2,
        "page 1 must not be re-fetched"
    );
}

#[tokio::test]
async fn cancellation_skips_all_requests() {
    let server = MockServer::start().await;
    let counter = Arc::new(AtomicUsize::new(0));

    Mock::given(method("GET"))
        .and(path("/migrations/3"))
        .respond_with(CountingResponder {
            counter: counter.clone(),
            template: ResponseTemplate::new(200).set_body_string("{}"),
        })
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let client = ApiClientBuilder::new()
        .with_retry_policy(RetryPolicy::immediate(3))
        .with_cancellation_token(cancel)
        .build()
        .expect("client");

    let err = client
        .get(&format!("{}/migrations/3", server.uri()))
        .await
        .expect_err("cancelled client must not send");

    assert!(matches!(err, ClientError::Cancelled));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}
