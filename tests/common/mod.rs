#![allow(dead_code)]

use httpmock::{Method::GET, Method::POST, Mock, MockServer};
use serde_json::{json, Value as JsonValue};
use sqlsweep::config::SweepConfig;
use sqlsweep::engine::SweepEngine;
use sqlsweep::rest::auth::StaticCredential;
use sqlsweep::rest::client::ArmClient;
use std::sync::Arc;
use std::time::Duration;

pub const SUBSCRIPTION: &str = "11111111-2222-3333-4444-555555555555";
pub const SQL_API_VERSION: &str = "2021-02-01-preview";

pub fn management_caller(server: &MockServer) -> Arc<ArmClient> {
    Arc::new(
        ArmClient::new(
            &server.base_url(),
            Arc::new(StaticCredential::new("test-token")),
            Duration::from_secs(5),
        )
        .expect("management client builds against mock server"),
    )
}

pub fn sweep_config(server: &MockServer) -> SweepConfig {
    SweepConfig {
        subscription_id: Some(SUBSCRIPTION.to_string()),
        management_endpoint: server.base_url(),
        poll_interval_secs: 0,
        ..SweepConfig::default()
    }
}

pub fn build_engine(server: &MockServer, config: SweepConfig) -> SweepEngine {
    SweepEngine::new(management_caller(server), config)
}

pub fn server_resource_id(resource_group: &str, server_name: &str) -> String {
    format!(
        "/subscriptions/{SUBSCRIPTION}/resourcegroups/{resource_group}/providers/Microsoft.Sql/servers/{server_name}"
    )
}

pub fn database_resource_id(resource_group: &str, server_name: &str, database: &str) -> String {
    format!(
        "{}/databases/{database}",
        server_resource_id(resource_group, server_name)
    )
}

pub fn pool_resource_id(resource_group: &str, server_name: &str, pool: &str) -> String {
    format!(
        "{}/elasticpools/{pool}",
        server_resource_id(resource_group, server_name)
    )
}

pub fn db_entry(
    resource_group: &str,
    server_name: &str,
    name: &str,
    tier: &str,
    status: &str,
) -> JsonValue {
    json!({
        "id": database_resource_id(resource_group, server_name, name),
        "name": name,
        "properties": {
            "currentSku": { "tier": tier },
            "status": status,
            "elasticPoolId": JsonValue::Null,
        }
    })
}

pub fn pooled_db_entry(
    resource_group: &str,
    server_name: &str,
    name: &str,
    pool: &str,
) -> JsonValue {
    json!({
        "id": database_resource_id(resource_group, server_name, name),
        "name": name,
        "properties": {
            "currentSku": { "tier": "GeneralPurpose" },
            "status": "Online",
            "elasticPoolId": pool_resource_id(resource_group, server_name, pool),
        }
    })
}

pub fn mock_subscriptions<'a>(server: &'a MockServer, ids: &[&str]) -> Mock<'a> {
    let value: Vec<JsonValue> = ids
        .iter()
        .map(|id| json!({ "subscriptionId": id, "id": format!("/subscriptions/{id}") }))
        .collect();
    server.mock(|when, then| {
        when.method(GET).path("/subscriptions");
        then.status(200).json_body(json!({ "value": value }));
    })
}

pub fn mock_resource_groups<'a>(server: &'a MockServer, groups: &[&str]) -> Mock<'a> {
    let value: Vec<JsonValue> = groups.iter().map(|name| json!({ "name": name })).collect();
    server.mock(|when, then| {
        when.method(GET)
            .path(format!("/subscriptions/{SUBSCRIPTION}/resourcegroups"));
        then.status(200).json_body(json!({ "value": value }));
    })
}

pub fn mock_servers<'a>(
    server: &'a MockServer,
    resource_group: &str,
    names: &[&str],
) -> Mock<'a> {
    let value: Vec<JsonValue> = names
        .iter()
        .map(|name| {
            json!({
                "id": server_resource_id(resource_group, name),
                "name": name,
            })
        })
        .collect();
    server.mock(|when, then| {
        when.method(GET).path(format!(
            "/subscriptions/{SUBSCRIPTION}/resourcegroups/{resource_group}/providers/Microsoft.Sql/servers"
        ));
        then.status(200).json_body(json!({ "value": value }));
    })
}

pub fn mock_pools<'a>(
    server: &'a MockServer,
    resource_group: &str,
    server_name: &str,
    pools: &[&str],
) -> Mock<'a> {
    let value: Vec<JsonValue> = pools
        .iter()
        .map(|name| {
            json!({
                "id": pool_resource_id(resource_group, server_name, name),
                "name": name,
            })
        })
        .collect();
    server.mock(|when, then| {
        when.method(GET).path(format!(
            "{}/elasticpools",
            server_resource_id(resource_group, server_name)
        ));
        then.status(200).json_body(json!({ "value": value }));
    })
}

pub fn mock_databases<'a>(
    server: &'a MockServer,
    resource_group: &str,
    server_name: &str,
    entries: Vec<JsonValue>,
) -> Mock<'a> {
    server.mock(|when, then| {
        when.method(GET).path(format!(
            "{}/databases",
            server_resource_id(resource_group, server_name)
        ));
        then.status(200).json_body(json!({ "value": entries }));
    })
}

pub fn operation_status_path(operation: &str) -> String {
    format!("/subscriptions/{SUBSCRIPTION}/operations/{operation}")
}

/// Accepts the failover of one resource with a 202 whose
/// `Azure-AsyncOperation` header points back at the mock server; the engine
/// must reduce it to a relative path before polling.
pub fn mock_failover_accepted<'a>(
    server: &'a MockServer,
    resource_id: &str,
    operation: &str,
) -> Mock<'a> {
    let location = format!("{}{}", server.base_url(), operation_status_path(operation));
    server.mock(|when, then| {
        when.method(POST).path(format!("{resource_id}/failover"));
        then.status(202)
            .header("Azure-AsyncOperation", location)
            .json_body(json!({}));
    })
}

pub fn mock_failover_rejected<'a>(
    server: &'a MockServer,
    resource_id: &str,
    status: u16,
    body: JsonValue,
) -> Mock<'a> {
    server.mock(|when, then| {
        when.method(POST).path(format!("{resource_id}/failover"));
        then.status(status).json_body(body);
    })
}

pub fn mock_operation_status<'a>(
    server: &'a MockServer,
    operation: &str,
    body: JsonValue,
) -> Mock<'a> {
    server.mock(|when, then| {
        when.method(GET).path(operation_status_path(operation));
        then.status(200).json_body(body);
    })
}
