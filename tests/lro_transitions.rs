#[path = "common/mod.rs"]
mod common;

use common::*;
use httpmock::{Method::GET, MockServer};
use serde_json::json;
use sqlsweep::lro;
use sqlsweep::target::{FailoverTarget, ServerDescriptor, TargetStatus};
use std::sync::Arc;

const RG: &str = "lro-rg";
const SRV: &str = "lro-srv";

fn descriptor() -> Arc<ServerDescriptor> {
    Arc::new(ServerDescriptor {
        subscription_id: SUBSCRIPTION.to_string(),
        resource_group: RG.to_string(),
        name: SRV.to_string(),
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn poll_keeps_target_in_progress_until_the_operation_succeeds() {
    let server = MockServer::start_async().await;
    let caller = management_caller(&server);

    let mut target = FailoverTarget::elastic_pool(&descriptor(), "pool1");
    mock_failover_accepted(&server, &pool_resource_id(RG, SRV, "pool1"), "op1");

    lro::initiate(caller.as_ref(), &mut target).await;
    assert_eq!(target.status(), TargetStatus::InProgress);
    assert_eq!(
        target.status_path(),
        Some(operation_status_path("op1").as_str()),
        "the absolute Azure-AsyncOperation URL must be reduced to a relative path"
    );

    let mut in_progress =
        mock_operation_status(&server, "op1", json!({ "status": "InProgress" }));
    lro::poll(caller.as_ref(), &mut target).await;
    assert_eq!(target.status(), TargetStatus::InProgress);
    in_progress.assert();
    in_progress.delete();

    mock_operation_status(&server, "op1", json!({ "status": "Succeeded" }));
    lro::poll(caller.as_ref(), &mut target).await;
    assert_eq!(target.status(), TargetStatus::Succeeded);
}

#[tokio::test(flavor = "multi_thread")]
async fn ineligible_target_skips_without_touching_the_management_plane() {
    let server = MockServer::start_async().await;
    let caller = management_caller(&server);

    let entry = db_entry(RG, SRV, "hyper", "Hyperscale", "Online");
    let mut target = FailoverTarget::database(&descriptor(), &entry).expect("target");
    let failover =
        mock_failover_accepted(&server, &database_resource_id(RG, SRV, "hyper"), "op1");

    lro::initiate(caller.as_ref(), &mut target).await;

    assert_eq!(target.status(), TargetStatus::Skipped);
    assert_eq!(target.message(), Some(lro::INELIGIBLE_MESSAGE));
    assert_eq!(failover.hits(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn accepted_response_without_operation_header_fails_the_target() {
    let server = MockServer::start_async().await;
    let caller = management_caller(&server);

    let mut target = FailoverTarget::elastic_pool(&descriptor(), "pool1");
    server.mock(|when, then| {
        when.method(httpmock::Method::POST)
            .path(format!("{}/failover", pool_resource_id(RG, SRV, "pool1")));
        then.status(202);
    });

    lro::initiate(caller.as_ref(), &mut target).await;

    assert_eq!(target.status(), TargetStatus::Failed);
    assert!(
        target.message().unwrap_or_default().contains("Azure-AsyncOperation"),
        "failure message should name the missing header"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn poll_transport_failure_is_terminal_for_the_target() {
    let server = MockServer::start_async().await;
    let caller = management_caller(&server);

    let mut target = FailoverTarget::elastic_pool(&descriptor(), "pool1");
    mock_failover_accepted(&server, &pool_resource_id(RG, SRV, "pool1"), "op1");
    lro::initiate(caller.as_ref(), &mut target).await;

    server.mock(|when, then| {
        when.method(GET).path(operation_status_path("op1"));
        then.status(503).body("gateway unavailable");
    });

    lro::poll(caller.as_ref(), &mut target).await;

    assert_eq!(target.status(), TargetStatus::Failed);
    assert!(
        target.message().unwrap_or_default().contains("503"),
        "message carries the transport status: {:?}",
        target.message()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn reported_failure_with_other_code_keeps_the_error_message() {
    let server = MockServer::start_async().await;
    let caller = management_caller(&server);

    let mut target = FailoverTarget::elastic_pool(&descriptor(), "pool1");
    mock_failover_accepted(&server, &pool_resource_id(RG, SRV, "pool1"), "op1");
    lro::initiate(caller.as_ref(), &mut target).await;

    mock_operation_status(
        &server,
        "op1",
        json!({
            "status": "Failed",
            "error": {
                "code": "DatabaseFailoverThrottled",
                "message": "too many concurrent failovers"
            }
        }),
    );

    lro::poll(caller.as_ref(), &mut target).await;

    assert_eq!(target.status(), TargetStatus::Failed);
    let message = target.message().unwrap_or_default();
    assert!(message.contains("DatabaseFailoverThrottled"), "{message}");
    assert!(message.contains("too many concurrent failovers"), "{message}");
}
