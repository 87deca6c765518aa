#![forbid(unsafe_code)]

use crate::error::{Error, Result};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

pub const SQL_API_VERSION: &str = "2021-02-01-preview";

const HYPERSCALE_TIER: &str = "Hyperscale";
const ONLINE_STATUS: &str = "Online";

/// Identity of one logical SQL server, parsed positionally from its ARM
/// resource id (`/subscriptions/<s>/resourcegroups/<rg>/.../servers/<name>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub subscription_id: String,
    pub resource_group: String,
    pub name: String,
}

impl ServerDescriptor {
    pub fn from_resource_id(id: &str) -> Result<Self> {
        let segments: Vec<&str> = id.split('/').filter(|s| !s.is_empty()).collect();

        let value_after = |key: &str| -> Option<&str> {
            segments
                .iter()
                .position(|segment| segment.eq_ignore_ascii_case(key))
                .and_then(|idx| segments.get(idx + 1))
                .copied()
        };

        let subscription_id = value_after("subscriptions");
        let resource_group = value_after("resourcegroups");
        let name = segments
            .iter()
            .rposition(|segment| segment.eq_ignore_ascii_case("servers"))
            .and_then(|idx| segments.get(idx + 1))
            .copied();

        match (subscription_id, resource_group, name) {
            (Some(subscription_id), Some(resource_group), Some(name)) => Ok(Self {
                subscription_id: subscription_id.to_string(),
                resource_group: resource_group.to_string(),
                name: name.to_string(),
            }),
            _ => Err(Error::discovery(format!(
                "resource id `{id}` is not a server-scoped Microsoft.Sql id"
            ))),
        }
    }

    pub fn resource_id(&self) -> String {
        format!(
            "/subscriptions/{}/resourcegroups/{}/providers/Microsoft.Sql/servers/{}",
            self.subscription_id, self.resource_group, self.name
        )
    }
}

impl fmt::Display for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_group, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Database,
    ElasticPool,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Database => "database",
            TargetKind::ElasticPool => "elasticPool",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    Pending,
    InProgress,
    Succeeded,
    Skipped,
    Failed,
}

impl TargetStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TargetStatus::Succeeded | TargetStatus::Skipped | TargetStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Pending => "Pending",
            TargetStatus::InProgress => "InProgress",
            TargetStatus::Succeeded => "Succeeded",
            TargetStatus::Skipped => "Skipped",
            TargetStatus::Failed => "Failed",
        }
    }
}

/// One failover unit: a standalone database, or an elastic pool regardless of
/// how many databases it contains. Status only moves along the legal edges;
/// terminal states are absorbing.
#[derive(Debug, Clone)]
pub struct FailoverTarget {
    pub server: Arc<ServerDescriptor>,
    pub kind: TargetKind,
    pub name: String,
    pub resource_id: String,
    pub should_failover: bool,
    status: TargetStatus,
    status_path: Option<String>,
    message: Option<String>,
}

impl FailoverTarget {
    /// Builds a database target from one entry of the database listing.
    /// Eligibility is fixed here, from the listing payload, and never
    /// re-evaluated.
    pub fn database(server: &Arc<ServerDescriptor>, entry: &JsonValue) -> Result<Self> {
        let resource_id = entry
            .get("id")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| Error::discovery("database listing entry has no `id`"))?;
        let name = entry
            .get("name")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| Error::discovery(format!("database `{resource_id}` has no `name`")))?;

        let tier = entry
            .pointer("/properties/currentSku/tier")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        let status = entry
            .pointer("/properties/status")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        let should_failover = tier != HYPERSCALE_TIER && status == ONLINE_STATUS;

        Ok(Self {
            server: Arc::clone(server),
            kind: TargetKind::Database,
            name: name.to_string(),
            resource_id: resource_id.to_string(),
            should_failover,
            status: TargetStatus::Pending,
            status_path: None,
            message: None,
        })
    }

    /// Builds a pool target. Pools are always eligible; their resource id is
    /// synthesised from the owning server.
    pub fn elastic_pool(server: &Arc<ServerDescriptor>, pool_name: &str) -> Self {
        let resource_id = format!("{}/elasticpools/{}", server.resource_id(), pool_name);
        Self {
            server: Arc::clone(server),
            kind: TargetKind::ElasticPool,
            name: pool_name.to_string(),
            resource_id,
            should_failover: true,
            status: TargetStatus::Pending,
            status_path: None,
            message: None,
        }
    }

    pub fn failover_path(&self) -> String {
        format!(
            "{}/failover?api-version={}",
            self.resource_id, SQL_API_VERSION
        )
    }

    pub fn status(&self) -> TargetStatus {
        self.status
    }

    pub fn status_path(&self) -> Option<&str> {
        self.status_path.as_deref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn mark_in_progress(&mut self, status_path: String) {
        if self.status == TargetStatus::Pending {
            self.status = TargetStatus::InProgress;
            self.status_path = Some(status_path);
        }
    }

    pub fn mark_succeeded(&mut self) {
        if !self.status.is_terminal() {
            self.status = TargetStatus::Succeeded;
        }
    }

    pub fn mark_skipped(&mut self, message: impl Into<String>) {
        if !self.status.is_terminal() {
            self.status = TargetStatus::Skipped;
            self.message = Some(message.into());
        }
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) {
        if !self.status.is_terminal() {
            self.status = TargetStatus::Failed;
            self.message = Some(message.into());
        }
    }
}
