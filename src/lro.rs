#![forbid(unsafe_code)]

use crate::rest::client::ManagementCaller;
use crate::target::{FailoverTarget, TargetStatus};
use crate::telemetry::runtime_counters;
use reqwest::Method;
use serde_json::Value as JsonValue;

pub const INELIGIBLE_MESSAGE: &str = "not eligible (hyperscale) or not active (offline)";
pub const NOT_IN_STATE_MESSAGE: &str = "serverless/offline, no failover needed";

const ASYNC_OPERATION_HEADER: &str = "Azure-AsyncOperation";
const NOT_IN_STATE_CODE: &str = "DatabaseNotInStateToFailover";

/// Starts the failover for one `Pending` target. Ineligible targets skip
/// without touching the management plane; an accepted request moves the
/// target to `InProgress` with the operation's status path; any other
/// response fails the target. Errors never propagate — each target carries
/// its own outcome.
pub async fn initiate(caller: &dyn ManagementCaller, target: &mut FailoverTarget) {
    if target.status() != TargetStatus::Pending {
        return;
    }

    if !target.should_failover {
        target.mark_skipped(INELIGIBLE_MESSAGE);
        runtime_counters().inc_targets_skipped();
        tracing::info!(
            target: "sqlsweep::lro",
            event = "target_skipped",
            kind = target.kind.as_str(),
            resource = %target.resource_id,
            reason = INELIGIBLE_MESSAGE
        );
        return;
    }

    let path = target.failover_path();
    let response = match caller.send(Method::POST, &path, None).await {
        Ok(response) => response,
        Err(err) => {
            fail(target, err.to_string());
            return;
        }
    };

    match response.status {
        200 | 202 => {
            let Some(operation_url) = response.header(ASYNC_OPERATION_HEADER) else {
                fail(
                    target,
                    format!("failover accepted without an {ASYNC_OPERATION_HEADER} header"),
                );
                return;
            };
            let status_path = caller.relative_path(operation_url);
            runtime_counters().inc_failovers_initiated();
            tracing::info!(
                target: "sqlsweep::lro",
                event = "failover_initiated",
                kind = target.kind.as_str(),
                resource = %target.resource_id,
                status_path = %status_path
            );
            target.mark_in_progress(status_path);
        }
        status => {
            fail(
                target,
                format!("POST failover returned {status}: {}", response.body_text()),
            );
        }
    }
}

/// Polls the status endpoint of one `InProgress` target and applies the
/// reported outcome. `DatabaseNotInStateToFailover` is the one failure code
/// that downgrades to a skip: the resource had nothing to fail over.
pub async fn poll(caller: &dyn ManagementCaller, target: &mut FailoverTarget) {
    if target.status() != TargetStatus::InProgress {
        return;
    }
    let Some(status_path) = target.status_path().map(str::to_string) else {
        fail(target, "in-progress target has no status path".to_string());
        return;
    };

    let response = match caller.send(Method::GET, &status_path, None).await {
        Ok(response) => response,
        Err(err) => {
            fail(target, err.to_string());
            return;
        }
    };

    if response.status != 200 {
        fail(
            target,
            format!(
                "operation status returned {}: {}",
                response.status,
                response.body_text()
            ),
        );
        return;
    }

    let reported = response
        .body
        .get("status")
        .and_then(JsonValue::as_str)
        .unwrap_or_default();

    match reported {
        "Succeeded" => {
            runtime_counters().inc_targets_succeeded();
            tracing::info!(
                target: "sqlsweep::lro",
                event = "failover_succeeded",
                kind = target.kind.as_str(),
                resource = %target.resource_id
            );
            target.mark_succeeded();
        }
        "Failed" => {
            let code = response
                .body
                .pointer("/error/code")
                .and_then(JsonValue::as_str)
                .unwrap_or_default();
            if code == NOT_IN_STATE_CODE {
                runtime_counters().inc_targets_skipped();
                tracing::info!(
                    target: "sqlsweep::lro",
                    event = "target_skipped",
                    kind = target.kind.as_str(),
                    resource = %target.resource_id,
                    reason = NOT_IN_STATE_MESSAGE
                );
                target.mark_skipped(NOT_IN_STATE_MESSAGE);
            } else {
                let message = response
                    .body
                    .pointer("/error/message")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| response.body_text());
                fail(target, format!("operation reported failure ({code}): {message}"));
            }
        }
        _ => {
            tracing::debug!(
                target: "sqlsweep::lro",
                event = "failover_pending",
                kind = target.kind.as_str(),
                resource = %target.resource_id,
                reported = reported
            );
        }
    }
}

fn fail(target: &mut FailoverTarget, message: String) {
    runtime_counters().inc_targets_failed();
    tracing::warn!(
        target: "sqlsweep::lro",
        event = "target_failed",
        kind = target.kind.as_str(),
        resource = %target.resource_id,
        error = %message
    );
    target.mark_failed(message);
}
