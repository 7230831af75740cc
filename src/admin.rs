//! `/__admin` endpoints for driving a standalone server over HTTP.
//!
//! Admin calls are not recorded in the request journal.

use crate::config::{RequestMatcher, StubDefinition};
use crate::journal::RecordedRequest;
use crate::responder::StubResponse;
use crate::server::ServerState;
use serde_json::json;
use tracing::info;

pub(crate) const ADMIN_PREFIX: &str = "/__admin";

pub(crate) fn is_admin_path(path: &str) -> bool {
    path.strip_prefix(ADMIN_PREFIX)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

pub(crate) async fn handle(state: &ServerState, request: &RecordedRequest) -> StubResponse {
    let route = request.path[ADMIN_PREFIX.len()..].trim_end_matches('/');

    match (request.method.as_str(), route) {
        ("GET", "/mappings") => {
            let stubs = state.registry.read().await.definitions();
            StubResponse::json(200, &json!({ "total": stubs.len(), "mappings": stubs }))
        }
        ("POST", "/mappings") => {
            let stub: StubDefinition = match serde_json::from_slice(&request.body) {
                Ok(stub) => stub,
                Err(e) => return bad_request(e),
            };
            let body = json!(stub);
            let id = stub.id.clone();
            match state.register_stub(stub).await {
                Ok(()) => {
                    info!(stub_id = %id, "Stub registered via admin API");
                    StubResponse::json(201, &body)
                }
                Err(e) => bad_request(e),
            }
        }
        ("DELETE", route) if route.starts_with("/mappings/") => {
            let id = &route["/mappings/".len()..];
            match state.registry.write().await.remove(id) {
                Some(stub) => StubResponse::json(200, &json!(stub)),
                None => not_found(&request.path),
            }
        }
        ("POST", "/reset") => {
            state.reset().await;
            StubResponse::new(200)
        }
        ("GET", "/requests") => {
            let journal = state.journal.read().await;
            StubResponse::json(
                200,
                &json!({ "total": journal.len(), "requests": journal.requests() }),
            )
        }
        ("POST", "/requests/count") => {
            let pattern: RequestMatcher = match serde_json::from_slice(&request.body) {
                Ok(pattern) => pattern,
                Err(e) => return bad_request(e),
            };
            match state.journal.read().await.find(&pattern) {
                Ok(found) => StubResponse::json(200, &json!({ "count": found.len() })),
                Err(e) => bad_request(e),
            }
        }
        _ => not_found(&request.path),
    }
}

fn bad_request(e: impl std::fmt::Display) -> StubResponse {
    StubResponse::json(400, &json!({ "error": "bad_request", "message": e.to_string() }))
}

fn not_found(path: &str) -> StubResponse {
    StubResponse::json(404, &json!({ "error": "not_found", "message": path }))
}
