//! End-to-end scenarios: intro stubs on a live server, driven with reqwest.

use reqwest::StatusCode;
use serial_test::serial;
use stub_server::config::DEFAULT_PORT;
use stub_server::fixture::{
    intro_stubs, start_intro_server, LIBRARY_BODY, SERVICE_UNAVAILABLE_BODY, WELCOME_BODY,
};
use stub_server::{
    BodyMatcher, CountMatcher, PathMatcher, RequestMatcher, ResponseBody, ResponseDefinition,
    ServerError, StubDefinition, StubServer, ValueMatcher, VerificationError,
};

fn intro_json() -> String {
    std::fs::read_to_string(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/fixtures/wiremock_intro.json"
    ))
    .expect("read wiremock_intro.json")
}

fn content_type(response: &reqwest::Response) -> &str {
    response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

#[tokio::test]
#[serial]
async fn plain_get_returns_welcome_text() {
    let server = start_intro_server(DEFAULT_PORT).await.unwrap();

    let response = reqwest::get(format!("http://localhost:{DEFAULT_PORT}/rest"))
        .await
        .unwrap();

    server
        .verify(&RequestMatcher::get(PathMatcher::url("/rest")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), WELCOME_BODY);

    server.stop().await.unwrap();
}

#[tokio::test]
#[serial]
async fn pattern_get_returns_json_content_type() {
    let server = start_intro_server(DEFAULT_PORT).await.unwrap();

    let response = reqwest::get(server.url("/rest/wiremock")).await.unwrap();

    server
        .verify(&RequestMatcher::get(PathMatcher::url("/rest/wiremock")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "application/json");
    assert_eq!(response.text().await.unwrap(), LIBRARY_BODY);

    server.stop().await.unwrap();
}

#[tokio::test]
#[serial]
async fn text_accept_header_gets_service_unavailable() {
    let server = start_intro_server(DEFAULT_PORT).await.unwrap();

    let response = reqwest::Client::new()
        .get(server.url("/rest/wiremock"))
        .header("Accept", "text/html")
        .send()
        .await
        .unwrap();

    server
        .verify(&RequestMatcher::get(PathMatcher::url("/rest/wiremock")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(content_type(&response), "text/html");
    assert_eq!(response.text().await.unwrap(), SERVICE_UNAVAILABLE_BODY);

    server.stop().await.unwrap();
}

#[tokio::test]
#[serial]
async fn post_with_matching_body_is_accepted() {
    let server = start_intro_server(DEFAULT_PORT).await.unwrap();

    let response = reqwest::Client::new()
        .post(server.url("/rest/wiremock"))
        .header("Content-Type", "application/json")
        .body(intro_json())
        .send()
        .await
        .unwrap();

    server
        .verify_count(
            CountMatcher::Exactly(1),
            &RequestMatcher::post(PathMatcher::url("/rest/wiremock"))
                .with_header("Content-Type", ValueMatcher::exact("application/json")),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let recorded = server.requests().await;
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].stub_id.as_deref(), Some("post-intro"));

    server.stop().await.unwrap();
}

#[tokio::test]
#[serial]
async fn scenario_repeats_identically_after_reset() {
    let server = start_intro_server(DEFAULT_PORT).await.unwrap();
    let client = reqwest::Client::new();

    let mut observed = Vec::new();
    for _ in 0..2 {
        let response = client.get(server.url("/rest/wiremock")).send().await.unwrap();
        let status = response.status();
        let ct = content_type(&response).to_string();
        observed.push((status, ct, response.text().await.unwrap()));

        server
            .verify_count(
                CountMatcher::Exactly(1),
                &RequestMatcher::get(PathMatcher::url("/rest/wiremock")),
            )
            .await
            .unwrap();

        server.reset().await;
        assert!(server.requests().await.is_empty());
        server.register_stubs(intro_stubs()).await.unwrap();
    }

    assert_eq!(observed[0], observed[1]);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn verifying_request_never_sent_fails() {
    let server = start_intro_server(0).await.unwrap();

    reqwest::get(server.url("/rest")).await.unwrap();

    let never_sent = RequestMatcher::post(PathMatcher::url("/rest"));
    let result = server.verify(&never_sent).await;
    assert!(matches!(
        result,
        Err(VerificationError::CountMismatch { actual: 0, total: 1, .. })
    ));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn post_missing_body_fragment_is_unmatched() {
    let server = start_intro_server(0).await.unwrap();

    let response = reqwest::Client::new()
        .post(server.url("/rest/wiremock"))
        .header("Content-Type", "application/json")
        .body(r#"{"testing-library": "WireMock", "creator": "Tom Akehurst"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let unmatched = server.unmatched_requests().await;
    assert_eq!(unmatched.len(), 1);
    assert_eq!(unmatched[0].method, "POST");
    assert_eq!(server.total_unmatched(), 1);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn binding_an_occupied_port_fails() {
    let first = StubServer::start_on(0).await.unwrap();

    let second = StubServer::start_on(first.port()).await;
    assert!(matches!(second, Err(ServerError::Bind { .. })));

    first.stop().await.unwrap();
}

#[tokio::test]
async fn stop_releases_the_port() {
    let first = StubServer::start_on(0).await.unwrap();
    let port = first.port();
    first.stop().await.unwrap();

    let second = StubServer::start_on(port).await.unwrap();
    assert_eq!(second.port(), port);
    second.stop().await.unwrap();
}

#[tokio::test]
async fn templated_response_echoes_request() {
    let server = StubServer::start_on(0).await.unwrap();
    server
        .register_stub(StubDefinition::new(
            "user",
            RequestMatcher::get(PathMatcher::Template {
                template: "/users/{id}".to_string(),
            }),
            ResponseDefinition::ok()
                .with_json(serde_json::json!({"id": "{{path.id}}", "via": "{{method}}"}))
                .templated(),
        ))
        .await
        .unwrap();

    let body: serde_json::Value = reqwest::get(server.url("/users/42"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["id"], "42");
    assert_eq!(body["via"], "GET");
    server.stop().await.unwrap();
}

#[tokio::test]
async fn max_matches_exhausts_stub() {
    let server = StubServer::start_on(0).await.unwrap();
    server
        .register_stub(
            StubDefinition::new(
                "once",
                RequestMatcher::get(PathMatcher::exact("/once")),
                ResponseDefinition::ok().with_text("first"),
            )
            .with_max_matches(1),
        )
        .await
        .unwrap();

    let first = reqwest::get(server.url("/once")).await.unwrap();
    let second = reqwest::get(server.url("/once")).await.unwrap();

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::NOT_FOUND);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn admin_api_registers_and_lists() {
    let server = StubServer::start_on(0).await.unwrap();
    let client = reqwest::Client::new();

    let stub = StubDefinition::new(
        "ping",
        RequestMatcher::get(PathMatcher::exact("/ping"))
            .with_body(BodyMatcher::Empty),
        ResponseDefinition::ok().with_text("pong"),
    );
    let created = client
        .post(server.url("/__admin/mappings"))
        .json(&stub)
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);

    let pong = client.get(server.url("/ping")).send().await.unwrap();
    assert_eq!(pong.text().await.unwrap(), "pong");

    let mappings: serde_json::Value = client
        .get(server.url("/__admin/mappings"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(mappings["total"], 1);
    assert_eq!(mappings["mappings"][0]["id"], "ping");

    let count: serde_json::Value = client
        .post(server.url("/__admin/requests/count"))
        .json(&RequestMatcher::get(PathMatcher::exact("/ping")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(count["count"], 1);

    // Admin calls stay out of the journal
    assert_eq!(server.requests().await.len(), 1);

    let reset = client.post(server.url("/__admin/reset")).send().await.unwrap();
    assert_eq!(reset.status(), StatusCode::OK);
    assert!(server.stubs().await.is_empty());
    assert!(server.requests().await.is_empty());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn admin_api_rejects_invalid_stub() {
    let server = StubServer::start_on(0).await.unwrap();

    let response = reqwest::Client::new()
        .post(server.url("/__admin/mappings"))
        .body(r#"{"id": "bad", "request": {"path": {"type": "regex", "pattern": "("}}}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(server.stubs().await.is_empty());
    server.stop().await.unwrap();
}

#[tokio::test]
async fn failing_template_is_server_error_and_recorded() {
    let server = StubServer::start_on(0).await.unwrap();
    server
        .register_stub(StubDefinition::new(
            "clock",
            RequestMatcher::get(PathMatcher::exact("/clock")),
            ResponseDefinition::ok().with_text(r#"{{now "%Q"}}"#).templated(),
        ))
        .await
        .unwrap();

    let response = reqwest::get(server.url("/clock")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "render_failed");

    let recorded = server.requests().await;
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].stub_id.as_deref(), Some("clock"));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn file_body_is_served_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("welcome.txt");
    std::fs::write(&path, WELCOME_BODY).unwrap();

    let server = StubServer::start_on(0).await.unwrap();
    let mut response = ResponseDefinition::ok();
    response.body = Some(ResponseBody::File {
        path: path.display().to_string(),
    });
    server
        .register_stub(StubDefinition::new(
            "from-file",
            RequestMatcher::get(PathMatcher::exact("/file")),
            response,
        ))
        .await
        .unwrap();

    let served = reqwest::get(server.url("/file")).await.unwrap();
    assert_eq!(served.status(), StatusCode::OK);
    assert_eq!(content_type(&served), "application/octet-stream");
    assert_eq!(served.text().await.unwrap(), WELCOME_BODY);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn admin_api_lists_received_requests() {
    let server = start_intro_server(0).await.unwrap();
    let client = reqwest::Client::new();

    client.get(server.url("/rest")).send().await.unwrap();
    client.get(server.url("/unknown?x=1")).send().await.unwrap();

    let listing: serde_json::Value = client
        .get(server.url("/__admin/requests"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(listing["total"], 2);
    assert_eq!(listing["requests"][0]["method"], "GET");
    assert_eq!(listing["requests"][0]["path"], "/rest");
    assert_eq!(listing["requests"][0]["stub_id"], "welcome");
    assert_eq!(listing["requests"][1]["url"], "/unknown?x=1");
    assert!(listing["requests"][1]["stub_id"].is_null());

    server.stop().await.unwrap();
}
