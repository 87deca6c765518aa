#![forbid(unsafe_code)]

use crate::error::{Error, Result};
use crate::rest::client::ManagementCaller;
use crate::rest::paging::list_all;
use crate::target::{FailoverTarget, ServerDescriptor, SQL_API_VERSION};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

const GROUPS_API_VERSION: &str = "2021-04-01";
const SUBSCRIPTIONS_API_VERSION: &str = "2020-01-01";

/// Resolves the subscription to sweep. An explicit id passes through; empty
/// or `*` falls back to the caller's own context by listing the
/// subscriptions its credential can see, which must name exactly one.
pub async fn resolve_subscription(
    caller: &dyn ManagementCaller,
    configured: Option<&str>,
) -> Result<String> {
    match configured.map(str::trim) {
        Some(id) if !id.is_empty() && id != "*" => Ok(id.to_string()),
        _ => {
            let path = format!("/subscriptions?api-version={SUBSCRIPTIONS_API_VERSION}");
            let visible: Vec<String> = list_all(caller, &path)
                .await?
                .into_iter()
                .filter_map(|entry| {
                    entry
                        .get("subscriptionId")
                        .and_then(JsonValue::as_str)
                        .map(str::to_string)
                })
                .collect();
            match visible.as_slice() {
                [only] => {
                    tracing::info!(
                        target: "sqlsweep::discovery",
                        event = "subscription_resolved",
                        subscription = %only
                    );
                    Ok(only.clone())
                }
                [] => Err(Error::configuration(
                    "the credential has no visible subscriptions; pass an explicit subscription id",
                )),
                many => Err(Error::configuration(format!(
                    "subscription `*` is ambiguous: the credential sees {} subscriptions; \
                     pass an explicit subscription id",
                    many.len()
                ))),
            }
        }
    }
}

/// Resource-group narrowing. Empty or `*` enumerates every group visible in
/// the subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceGroupFilter {
    All,
    Named(String),
}

impl ResourceGroupFilter {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") | Some("*") => ResourceGroupFilter::All,
            Some(name) => ResourceGroupFilter::Named(name.to_string()),
        }
    }
}

impl fmt::Display for ResourceGroupFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceGroupFilter::All => f.write_str("*"),
            ResourceGroupFilter::Named(name) => f.write_str(name),
        }
    }
}

/// Logical-server narrowing: a comma-separated exact-match list, trimmed.
/// Empty or `*` keeps every server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFilter {
    All,
    Named(Vec<String>),
}

impl ServerFilter {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") | Some("*") => ServerFilter::All,
            Some(list) => {
                let names: Vec<String> = list
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect();
                if names.is_empty() {
                    ServerFilter::All
                } else {
                    ServerFilter::Named(names)
                }
            }
        }
    }

    pub fn matches(&self, server_name: &str) -> bool {
        match self {
            ServerFilter::All => true,
            ServerFilter::Named(names) => names.iter().any(|name| name == server_name),
        }
    }
}

impl fmt::Display for ServerFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerFilter::All => f.write_str("*"),
            ServerFilter::Named(names) => f.write_str(&names.join(",")),
        }
    }
}

/// Enumerates the failover targets under the subscription and filters. Pools
/// are listed before databases so every database belonging to a pool can be
/// dropped in favour of its (already emitted) pool target; this keeps the
/// result deduplicated without tracking pool ids.
pub async fn discover(
    caller: &dyn ManagementCaller,
    subscription_id: &str,
    group_filter: &ResourceGroupFilter,
    server_filter: &ServerFilter,
) -> Result<Vec<FailoverTarget>> {
    tracing::info!(
        target: "sqlsweep::discovery",
        event = "discovery_started",
        subscription = subscription_id,
        resource_group_filter = %group_filter,
        server_filter = %server_filter
    );

    let groups = match group_filter {
        ResourceGroupFilter::Named(name) => vec![name.clone()],
        ResourceGroupFilter::All => {
            let path =
                format!("/subscriptions/{subscription_id}/resourcegroups?api-version={GROUPS_API_VERSION}");
            list_all(caller, &path)
                .await?
                .into_iter()
                .filter_map(|entry| {
                    entry
                        .get("name")
                        .and_then(JsonValue::as_str)
                        .map(str::to_string)
                })
                .collect()
        }
    };

    let mut servers: Vec<Arc<ServerDescriptor>> = Vec::new();
    for group in &groups {
        let path = format!(
            "/subscriptions/{subscription_id}/resourcegroups/{group}/providers/Microsoft.Sql/servers?api-version={SQL_API_VERSION}"
        );
        for entry in list_all(caller, &path).await? {
            let id = entry
                .get("id")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| Error::discovery("server listing entry has no `id`"))?;
            let descriptor = ServerDescriptor::from_resource_id(id)?;
            if server_filter.matches(&descriptor.name) {
                tracing::debug!(
                    target: "sqlsweep::discovery",
                    event = "server_retained",
                    server = %descriptor
                );
                servers.push(Arc::new(descriptor));
            }
        }
    }

    if servers.is_empty() {
        return Err(Error::discovery(format!(
            "no logical servers matched subscription `{subscription_id}`, \
             resource group filter `{group_filter}`, server filter `{server_filter}`"
        )));
    }

    let mut targets = Vec::new();
    for server in &servers {
        let pools_path = format!(
            "{}/elasticpools?api-version={SQL_API_VERSION}",
            server.resource_id()
        );
        for entry in list_all(caller, &pools_path).await? {
            let pool_name = entry
                .get("name")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| {
                    Error::discovery(format!("elastic pool entry on `{server}` has no `name`"))
                })?;
            targets.push(FailoverTarget::elastic_pool(server, pool_name));
        }

        let databases_path = format!(
            "{}/databases?api-version={SQL_API_VERSION}",
            server.resource_id()
        );
        for entry in list_all(caller, &databases_path).await? {
            let pooled = entry
                .pointer("/properties/elasticPoolId")
                .map(|value| !value.is_null())
                .unwrap_or(false);
            if pooled {
                continue;
            }
            targets.push(FailoverTarget::database(server, &entry)?);
        }
    }

    tracing::info!(
        target: "sqlsweep::discovery",
        event = "discovery_completed",
        servers = servers.len(),
        targets = targets.len()
    );

    Ok(targets)
}
