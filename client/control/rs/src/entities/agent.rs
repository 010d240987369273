use serde::{Deserialize, Serialize};
use strum::Display;
use typeshare::typeshare;

/// Assigned by the control plane at registration.
/// Held in memory for the lifetime of the process.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdentity {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub status: Option<String>,
  #[serde(default)]
  pub config: AgentPlatformConfig,
}

/// Platform-wide defaults the control plane may push down.
#[typeshare]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPlatformConfig {
  #[serde(default)]
  pub apps_domain: Option<String>,
  #[serde(default)]
  pub server_ip: Option<String>,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
  pub hostname: String,
  pub kube_version: String,
  pub resources: SystemResources,
}

#[typeshare]
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AgentStatus {
  #[default]
  Online,
  /// In-flight command count is at the configured ceiling.
  Busy,
  /// The last cycle surfaced an unrecoverable condition.
  Error,
}

/// Host + cluster resource snapshot.
#[typeshare]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemResources {
  pub cpu_cores: u32,
  pub ram_mb: u64,
  pub disk_gb: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ram_used_mb: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub disk_used_gb: Option<u64>,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningPod {
  pub namespace: String,
  pub name: String,
  pub phase: String,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatSnapshot {
  pub status: AgentStatus,
  pub resources: SystemResources,
  pub running_pods: Vec<RunningPod>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_message: Option<String>,
}
