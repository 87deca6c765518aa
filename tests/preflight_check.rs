#[path = "common/mod.rs"]
mod common;

use common::*;
use httpmock::{Method::POST, MockServer};
use serde_json::json;
use sqlsweep::error::Error;
use sqlsweep::preflight;
use tokio_util::sync::CancellationToken;

const GRAPH_PATH: &str = "/providers/Microsoft.ResourceGraph/resources";

#[tokio::test(flavor = "multi_thread")]
async fn most_recent_tracking_id_is_returned_when_a_window_is_open() {
    let server = MockServer::start_async().await;
    let caller = management_caller(&server);

    let graph = server.mock(|when, then| {
        when.method(POST)
            .path(GRAPH_PATH)
            .json_body_partial(format!(r#"{{ "subscriptions": ["{SUBSCRIPTION}"] }}"#));
        then.status(200).json_body(json!({
            "totalRecords": 2,
            "count": 2,
            "data": [
                { "trackingId": "maint-2026-08" },
                { "trackingId": "maint-2026-05" }
            ]
        }));
    });

    let tracking = preflight::active_notification(caller.as_ref(), SUBSCRIPTION)
        .await
        .expect("query succeeds");

    assert_eq!(tracking.as_deref(), Some("maint-2026-08"));
    graph.assert();
}

#[tokio::test(flavor = "multi_thread")]
async fn absent_notification_aborts_the_run_before_discovery() {
    let server = MockServer::start_async().await;

    server.mock(|when, then| {
        when.method(POST).path(GRAPH_PATH);
        then.status(200)
            .json_body(json!({ "totalRecords": 0, "count": 0, "data": [] }));
    });
    let groups = mock_resource_groups(&server, &["any-rg"]);

    let mut config = sweep_config(&server);
    config.check_maintenance_notification = true;
    let engine = build_engine(&server, config);

    let err = engine.run(CancellationToken::new()).await.unwrap_err();
    match err {
        Error::Preflight { subscription } => assert_eq!(subscription, SUBSCRIPTION),
        other => panic!("expected preflight error, got {other:?}"),
    }
    assert_eq!(groups.hits(), 0, "discovery must not start");
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_graph_query_surfaces_the_response() {
    let server = MockServer::start_async().await;
    let caller = management_caller(&server);

    server.mock(|when, then| {
        when.method(POST).path(GRAPH_PATH);
        then.status(429).body("rate limited");
    });

    let err = preflight::active_notification(caller.as_ref(), SUBSCRIPTION)
        .await
        .unwrap_err();
    let rendered = err.to_string();
    assert!(rendered.contains("429"), "{rendered}");
    assert!(rendered.contains("rate limited"), "{rendered}");
}
