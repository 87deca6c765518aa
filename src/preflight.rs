#![forbid(unsafe_code)]

use crate::error::Result;
use crate::rest::client::ManagementCaller;
use reqwest::Method;
use serde_json::{json, Value as JsonValue};

/// Summary token that marks a planned-maintenance event as belonging to the
/// self-service maintenance programme.
pub const MAINTENANCE_TOKEN: &str = "azsqlcmwselfservicemaint";

const RESOURCE_GRAPH_PATH: &str =
    "/providers/Microsoft.ResourceGraph/resources?api-version=2021-03-01";

/// Looks up the most recent active self-service planned-maintenance event for
/// the subscription via the resource-graph view of service health. Returns
/// its tracking id, or `None` when no matching event is active.
pub async fn active_notification(
    caller: &dyn ManagementCaller,
    subscription_id: &str,
) -> Result<Option<String>> {
    let query = format!(
        "servicehealthresources \
         | where type =~ 'microsoft.resourcehealth/events' \
         | where properties.EventType == 'PlannedMaintenance' and properties.Status == 'Active' \
         | where properties.Summary contains '{MAINTENANCE_TOKEN}' \
         | order by todatetime(properties.LastUpdateTime) desc \
         | project trackingId = name"
    );
    let body = json!({
        "subscriptions": [subscription_id],
        "query": query,
    });

    let response = caller.send(Method::POST, RESOURCE_GRAPH_PATH, Some(&body)).await?;
    if !response.is_success() {
        crate::bail_err!(
            "maintenance notification query returned {}: {}",
            response.status,
            response.body_text()
        );
    }

    let tracking_id = response
        .body
        .get("data")
        .and_then(JsonValue::as_array)
        .and_then(|rows| rows.first())
        .and_then(|row| row.get("trackingId"))
        .and_then(JsonValue::as_str)
        .map(str::to_string);

    tracing::info!(
        target: "sqlsweep::preflight",
        event = "notification_checked",
        subscription = subscription_id,
        found = tracking_id.is_some(),
        tracking_id = tracking_id.as_deref().unwrap_or("")
    );

    Ok(tracking_id)
}
