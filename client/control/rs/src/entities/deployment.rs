use serde::{Deserialize, Serialize};
use strum::Display;
use typeshare::typeshare;

/// Status stream a deployment emits while a DEPLOY command runs.
/// Terminal states are `ready` and `failed`.
#[typeshare]
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeploymentStatus {
  Building,
  Deploying,
  Ready,
  Failed,
  Stopped,
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
pub enum DeploymentLogLevel {
  #[default]
  Info,
  Warning,
  Error,
}

/// Pipeline step a log line belongs to.
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
pub enum DeploymentStep {
  Clone,
  #[default]
  Build,
  Deploy,
}

/// Body of `POST /api/deployments/{id}/logs`.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentLogBody {
  pub message: String,
  pub level: DeploymentLogLevel,
  /// RFC 3339.
  pub timestamp: String,
  pub step: DeploymentStep,
}

/// Body of `PATCH /api/deployments/{id}/status`.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatusBody {
  pub status: DeploymentStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupUploadUrl {
  pub url: String,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatusBody {
  pub status: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub size_bytes: Option<u64>,
}
