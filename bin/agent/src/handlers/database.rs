//! Database lifecycle: template-and-apply of the four objects
//! (Secret, PVC, headless Service, StatefulSet), plus password
//! rotation and SNI-routed external access.

use anyhow::Context;
use deploypilot_client::entities::{
  command::{
    CommandResult, DatabaseKind, DatabasePasswordPayload,
    DatabasePayload, ExternalAccessPayload,
  },
  valid_resource_name,
};
use manifests::{
  DatabaseManifest, database_params, render_database_pvc,
  render_database_secret, render_database_service,
  render_database_statefulset, render_ingress_route_tcp,
};
use shell::quote;

use super::{parse_payload, result_from};

fn manifest_input(payload: &DatabasePayload) -> DatabaseManifest {
  DatabaseManifest {
    namespace: &payload.namespace,
    db_name: &payload.db_name,
    kind: payload.kind,
    version: &payload.version,
    username: &payload.username,
    password: &payload.password,
    database: payload.database(),
    storage_size: &payload.storage_size,
    memory_limit: &payload.memory_limit,
  }
}

pub async fn create(
  payload: &serde_json::Value,
) -> anyhow::Result<CommandResult> {
  let payload: DatabasePayload = parse_payload(payload)?;
  for name in [&payload.namespace, &payload.db_name] {
    if !valid_resource_name(name) {
      anyhow::bail!("invalid kubernetes name: {name:?}");
    }
  }
  let spec = manifest_input(&payload);
  let mut logs = String::new();

  let objects = [
    ("secret", render_database_secret(&spec)),
    ("pvc", render_database_pvc(&spec)),
    ("service", render_database_service(&spec)),
    ("statefulset", render_database_statefulset(&spec)),
  ];
  for (what, manifest) in &objects {
    let output = kube::apply_manifest(manifest).await;
    append(&mut logs, &output.combined());
    if !output.success {
      return Ok(CommandResult::failed(
        format!(
          "failed to apply database {what}: {}",
          output.error_message()
        ),
        Some(logs),
      ));
    }
  }

  let ready = kube::wait_statefulset_ready(
    &payload.namespace,
    &payload.db_name,
  )
  .await;
  append(&mut logs, &ready.combined());
  if !ready.success {
    return Ok(CommandResult::failed(
      ready.error_message(),
      Some(logs),
    ));
  }

  let port = database_params(payload.kind).port;
  append(
    &mut logs,
    &format!(
      "database reachable at {}.{}.svc.cluster.local:{port}",
      payload.db_name, payload.namespace
    ),
  );
  Ok(CommandResult::ok(Some(logs)))
}

/// Deletes all four objects plus any external access route.
/// Every sub-step tolerates absence.
pub async fn delete(
  payload: &serde_json::Value,
) -> anyhow::Result<CommandResult> {
  let payload: DatabasePayload = parse_payload(payload)?;
  let namespace = &payload.namespace;
  let db_name = &payload.db_name;
  let mut logs = String::new();
  let mut first_error = None;

  let targets = [
    ("statefulset", db_name.clone()),
    ("service", db_name.clone()),
    ("secret", format!("{db_name}-secret")),
    ("pvc", format!("{db_name}-pvc")),
    ("ingressroutetcp", format!("{db_name}-external")),
  ];
  for (kind, name) in &targets {
    let output =
      kube::delete_resource(namespace, kind, name).await;
    append(&mut logs, &output.combined());
    if !output.success && first_error.is_none() {
      first_error = Some(format!(
        "failed to delete {kind}/{name}: {}",
        output.error_message()
      ));
    }
  }

  Ok(match first_error {
    Some(error) => CommandResult::failed(error, Some(logs)),
    None => CommandResult::ok(Some(logs)),
  })
}

pub async fn update_password(
  payload: &serde_json::Value,
) -> anyhow::Result<CommandResult> {
  let payload: DatabasePasswordPayload = parse_payload(payload)?;
  let namespace = &payload.namespace;
  let db_name = &payload.db_name;
  let secret_name = format!("{db_name}-secret");
  let mut logs = String::new();

  let password_key = match payload.kind {
    DatabaseKind::Postgres => "POSTGRES_PASSWORD",
    DatabaseKind::Mongodb => "MONGO_INITDB_ROOT_PASSWORD",
    DatabaseKind::Redis => "REDIS_PASSWORD",
  };
  let patched = kube::patch_secret(
    namespace,
    &secret_name,
    &[(password_key, &payload.new_password)],
  )
  .await;
  append(&mut logs, &patched.combined());
  if !patched.success {
    return Ok(CommandResult::failed(
      format!(
        "failed to patch secret: {}",
        patched.error_message()
      ),
      Some(logs),
    ));
  }

  match payload.kind {
    // The running server has to pick the password up too; the
    // data directory keeps the old one across restarts.
    DatabaseKind::Postgres => {
      let sql = format!(
        "ALTER USER \"{}\" WITH PASSWORD '{}'",
        payload.username.replace('"', "\"\""),
        payload.new_password.replace('\'', "''"),
      );
      let command = format!(
        "psql -U {} -d postgres -c {}",
        quote(&payload.username),
        quote(&sql),
      );
      let altered = kube::exec_in_pod(
        namespace,
        &format!("{db_name}-0"),
        &command,
        std::time::Duration::from_secs(60),
      )
      .await;
      append(&mut logs, &altered.combined());
      if !altered.success {
        return Ok(CommandResult::failed(
          format!(
            "failed to alter postgres password: {}",
            altered.error_message()
          ),
          Some(logs),
        ));
      }
    }
    // Mongo and redis read credentials from the environment on
    // startup; a rollout restart applies the new secret.
    DatabaseKind::Mongodb | DatabaseKind::Redis => {
      let restarted =
        kube::rollout_restart(namespace, "statefulset", db_name)
          .await;
      append(&mut logs, &restarted.combined());
      if !restarted.success {
        return Ok(CommandResult::failed(
          format!(
            "failed to restart database: {}",
            restarted.error_message()
          ),
          Some(logs),
        ));
      }
    }
  }

  Ok(CommandResult::ok(Some(logs)))
}

pub async fn enable_external_access(
  payload: &serde_json::Value,
) -> anyhow::Result<CommandResult> {
  let payload: ExternalAccessPayload = parse_payload(payload)?;
  for name in [&payload.namespace, &payload.db_name] {
    if !valid_resource_name(name) {
      anyhow::bail!("invalid kubernetes name: {name:?}");
    }
  }
  let host = match &payload.host {
    Some(host) => host.clone(),
    None => {
      let identity = crate::state::ensure_registered().await?;
      let apps_domain = identity
        .config
        .apps_domain
        .clone()
        .context("no host given and the platform has no apps domain configured")?;
      format!(
        "{}.{}.{apps_domain}",
        payload.db_name, payload.namespace
      )
    }
  };
  if !valid_resource_name(&host) {
    anyhow::bail!("invalid external hostname {host:?}");
  }
  let manifest = render_ingress_route_tcp(
    &payload.namespace,
    &payload.db_name,
    payload.kind,
    &host,
  );
  let output = kube::apply_manifest(&manifest).await;
  if !output.success {
    return Ok(result_from(output));
  }
  let port = database_params(payload.kind).port;
  Ok(CommandResult::ok(Some(format!(
    "external access enabled at {host}:{port}"
  ))))
}

pub async fn disable_external_access(
  payload: &serde_json::Value,
) -> anyhow::Result<CommandResult> {
  let payload: ExternalAccessPayload = parse_payload(payload)?;
  let output = kube::delete_resource(
    &payload.namespace,
    "ingressroutetcp",
    &format!("{}-external", payload.db_name),
  )
  .await;
  Ok(result_from(output))
}

fn append(logs: &mut String, addition: &str) {
  if addition.is_empty() {
    return;
  }
  if !logs.is_empty() {
    logs.push('\n');
  }
  logs.push_str(addition);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn create_rejects_invalid_names() {
    let payload = serde_json::json!({
      "namespace": "Bad Namespace",
      "dbName": "main-db",
      "type": "postgres",
    });
    assert!(create(&payload).await.is_err());

    let payload = serde_json::json!({
      "namespace": "dp-u1",
      "dbName": "main db;",
      "type": "postgres",
    });
    assert!(create(&payload).await.is_err());
  }

  #[tokio::test]
  async fn external_access_rejects_invalid_names() {
    let payload = serde_json::json!({
      "namespace": "dp-u1",
      "dbName": "Main_DB",
      "type": "postgres",
      "host": "db.example.com",
    });
    assert!(enable_external_access(&payload).await.is_err());
  }
}
