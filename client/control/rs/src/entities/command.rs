use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use typeshare::typeshare;

use super::build::Framework;

/// One unit of work issued by the control plane.
/// A given id is executed at most once per agent process.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
  pub id: String,
  pub kind: CommandKind,
  /// Shape depends on `kind`. Parsed by the matching handler.
  #[serde(default)]
  pub payload: serde_json::Value,
  #[serde(default)]
  pub status: CommandStatus,
  #[serde(default)]
  pub created_at: Option<String>,
}

#[typeshare]
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
  Deploy,
  Stop,
  Restart,
  Delete,
  CreateNamespace,
  UpdateEnv,
  AddCustomDomain,
  RemoveCustomDomain,
  CreateDatabase,
  DeleteDatabase,
  UpdateDatabasePassword,
  EnableDatabaseExternalAccess,
  DisableDatabaseExternalAccess,
  CreateBackup,
  RestoreBackup,
  /// Anything this agent version does not recognise.
  /// Rejected at the dispatch boundary.
  #[serde(other)]
  Unknown,
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
pub enum CommandStatus {
  #[default]
  Pending,
  Acked,
  Running,
  Completed,
  Failed,
}

/// Terminal report for one command.
/// `success: false` always carries `error`.
#[typeshare]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
  pub success: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub logs: Option<String>,
}

impl CommandResult {
  pub fn ok(logs: impl Into<Option<String>>) -> CommandResult {
    CommandResult {
      success: true,
      error: None,
      logs: logs.into(),
    }
  }

  pub fn failed(
    error: impl Into<String>,
    logs: impl Into<Option<String>>,
  ) -> CommandResult {
    CommandResult {
      success: false,
      error: Some(error.into()),
      logs: logs.into(),
    }
  }
}

/// Payload for [CommandKind::Deploy].
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployPayload {
  pub app_name: String,
  pub deployment_id: String,
  pub user_id: String,
  pub git_repo_url: String,
  #[serde(default = "default_branch")]
  pub git_branch: String,
  #[serde(default)]
  pub git_token: Option<String>,
  pub framework: Framework,
  #[serde(default)]
  pub build_command: Option<String>,
  #[serde(default)]
  pub start_command: Option<String>,
  #[serde(default)]
  pub output_directory: Option<String>,
  #[serde(default = "default_port")]
  pub port: u16,
  #[serde(default)]
  pub env_vars: HashMap<String, String>,
  #[serde(default)]
  pub custom_domain: Option<String>,
}

fn default_branch() -> String {
  String::from("main")
}

fn default_port() -> u16 {
  3000
}

/// Payload for [CommandKind::CreateNamespace].
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespacePayload {
  pub user_id: String,
  #[serde(default)]
  pub registry_token: Option<String>,
}

/// Payload for Stop / Restart / Delete.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppTargetPayload {
  pub namespace: String,
  pub app_name: String,
}

/// Payload for [CommandKind::UpdateEnv].
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvUpdatePayload {
  pub namespace: String,
  pub app_name: String,
  #[serde(default)]
  pub env_vars: HashMap<String, String>,
}

/// Payload for AddCustomDomain / RemoveCustomDomain.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainPayload {
  pub namespace: String,
  pub app_name: String,
  pub domain: String,
  #[serde(default = "default_port")]
  pub port: u16,
}

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
  AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DatabaseKind {
  Postgres,
  Mongodb,
  Redis,
}

/// Payload for CreateDatabase / DeleteDatabase.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabasePayload {
  pub namespace: String,
  pub db_name: String,
  #[serde(rename = "type")]
  pub kind: DatabaseKind,
  #[serde(default = "default_db_version")]
  pub version: String,
  #[serde(default = "default_db_user")]
  pub username: String,
  #[serde(default)]
  pub password: String,
  /// Logical database name inside the server.
  /// Defaults to `db_name`.
  #[serde(default)]
  pub database: Option<String>,
  #[serde(default = "default_storage")]
  pub storage_size: String,
  #[serde(default = "default_memory")]
  pub memory_limit: String,
}

impl DatabasePayload {
  pub fn database(&self) -> &str {
    self.database.as_deref().unwrap_or(&self.db_name)
  }
}

fn default_db_version() -> String {
  String::from("latest")
}

fn default_db_user() -> String {
  String::from("admin")
}

fn default_storage() -> String {
  String::from("1Gi")
}

fn default_memory() -> String {
  String::from("512Mi")
}

/// Payload for [CommandKind::UpdateDatabasePassword].
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabasePasswordPayload {
  pub namespace: String,
  pub db_name: String,
  #[serde(rename = "type")]
  pub kind: DatabaseKind,
  #[serde(default = "default_db_user")]
  pub username: String,
  pub new_password: String,
}

/// Payload for Enable/DisableDatabaseExternalAccess.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAccessPayload {
  pub namespace: String,
  pub db_name: String,
  #[serde(rename = "type")]
  pub kind: DatabaseKind,
  /// SNI hostname to route. Defaults to
  /// `<db_name>.<namespace>.<apps_domain>`.
  #[serde(default)]
  pub host: Option<String>,
}

/// Payload for [CommandKind::CreateBackup].
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPayload {
  pub backup_id: String,
  pub namespace: String,
  pub db_name: String,
  #[serde(rename = "type")]
  pub kind: DatabaseKind,
  #[serde(default = "default_db_user")]
  pub username: String,
  #[serde(default)]
  pub database: Option<String>,
}

impl BackupPayload {
  pub fn database(&self) -> &str {
    self.database.as_deref().unwrap_or(&self.db_name)
  }
}

/// Payload for [CommandKind::RestoreBackup].
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestorePayload {
  pub backup_id: String,
  pub namespace: String,
  pub db_name: String,
  #[serde(rename = "type")]
  pub kind: DatabaseKind,
  #[serde(default = "default_db_user")]
  pub username: String,
  #[serde(default)]
  pub database: Option<String>,
  pub download_url: String,
}

impl RestorePayload {
  pub fn database(&self) -> &str {
    self.database.as_deref().unwrap_or(&self.db_name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_kind_deserializes_to_unknown() {
    let command: Command = serde_json::from_str(
      r#"{"id":"c1","kind":"SELF_DESTRUCT","payload":{}}"#,
    )
    .unwrap();
    assert_eq!(command.kind, CommandKind::Unknown);
  }

  #[test]
  fn kind_wire_format_is_screaming_snake() {
    assert_eq!(
      serde_json::to_string(&CommandKind::AddCustomDomain).unwrap(),
      "\"ADD_CUSTOM_DOMAIN\""
    );
    assert_eq!(
      serde_json::to_string(&CommandKind::Deploy).unwrap(),
      "\"DEPLOY\""
    );
  }

  #[test]
  fn deploy_payload_defaults() {
    let payload: DeployPayload = serde_json::from_str(
      r#"{
        "appName": "hello",
        "deploymentId": "d1",
        "userId": "u1",
        "gitRepoUrl": "https://github.com/acme/hello.git",
        "framework": "nextjs"
      }"#,
    )
    .unwrap();
    assert_eq!(payload.git_branch, "main");
    assert_eq!(payload.port, 3000);
    assert!(payload.env_vars.is_empty());
  }

  #[test]
  fn database_payload_type_tag() {
    let payload: DatabasePayload = serde_json::from_str(
      r#"{
        "namespace": "dp-u1",
        "dbName": "main-db",
        "type": "postgres",
        "version": "15",
        "password": "hunter2",
        "storageSize": "10Gi",
        "memoryLimit": "512Mi"
      }"#,
    )
    .unwrap();
    assert_eq!(payload.kind, DatabaseKind::Postgres);
    assert_eq!(payload.database(), "main-db");
  }
}
