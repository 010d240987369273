//! Backup and restore: dump inside the database pod, stream the
//! archive through the node, and hand it to the object store via
//! a pre-signed url (or the reverse). Temp files on both sides
//! are namespaced by backup id and removed best-effort.

use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use deploypilot_client::entities::{
  command::{
    BackupPayload, CommandResult, DatabaseKind, RestorePayload,
  },
  deployment::BackupStatusBody,
  valid_resource_name,
};
use shell::quote;

use super::parse_payload;
use crate::state::control_plane;

const DUMP_TIMEOUT: Duration = Duration::from_secs(600);
const COPY_TIMEOUT: Duration = Duration::from_secs(300);
const RESTORE_TIMEOUT: Duration = Duration::from_secs(600);
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn create(
  payload: &serde_json::Value,
) -> anyhow::Result<CommandResult> {
  let payload: BackupPayload = parse_payload(payload)?;
  for name in [
    &payload.backup_id,
    &payload.namespace,
    &payload.db_name,
  ] {
    if !valid_resource_name(name) {
      anyhow::bail!("invalid backup identifier {name:?}");
    }
  }

  report_status(&payload.backup_id, "in_progress", None, None)
    .await;
  let outcome = create_inner(&payload).await;

  let pod = format!("{}-0", payload.db_name);
  let remote_path = format!("/tmp/backup-{}", payload.backup_id);
  let local_path = local_backup_path(&payload.backup_id);
  cleanup(&payload.namespace, &pod, &remote_path, &local_path)
    .await;

  match outcome {
    Ok((result, size)) => {
      report_status(
        &payload.backup_id,
        "completed",
        None,
        Some(size),
      )
      .await;
      Ok(result)
    }
    Err(e) => {
      let error = format!("{e:#}");
      report_status(
        &payload.backup_id,
        "failed",
        Some(error.clone()),
        None,
      )
      .await;
      Ok(CommandResult::failed(error, None))
    }
  }
}

async fn create_inner(
  payload: &BackupPayload,
) -> anyhow::Result<(CommandResult, u64)> {
  let pod = format!("{}-0", payload.db_name);
  let remote_path = format!("/tmp/backup-{}", payload.backup_id);
  let local_path = local_backup_path(&payload.backup_id);

  let dump = dump_command(payload, &remote_path);
  let dumped = kube::exec_in_pod(
    &payload.namespace,
    &pod,
    &dump,
    DUMP_TIMEOUT,
  )
  .await;
  if !dumped.success {
    anyhow::bail!("dump failed: {}", dumped.error_message());
  }

  // Stream the archive out of the pod. The shell pipe is the one
  // composition argv spawning cannot express.
  let copy = format!(
    "kubectl exec -n {} {} -- cat {} > {}",
    quote(&payload.namespace),
    quote(&pod),
    quote(&remote_path),
    quote(&local_path.display().to_string()),
  );
  let copied = kube::execute(&copy, COPY_TIMEOUT).await;
  if !copied.success {
    anyhow::bail!(
      "failed to copy backup out of pod: {}",
      copied.error_message()
    );
  }

  let url = control_plane()
    .backup_upload_url(&payload.backup_id)
    .await?;
  let size = control_plane()
    .upload_to_presigned_url(&url, &local_path)
    .await
    .context("backup upload failed")?;

  Ok((
    CommandResult::ok(Some(format!(
      "backup {} uploaded ({size} bytes)",
      payload.backup_id
    ))),
    size,
  ))
}

pub async fn restore(
  payload: &serde_json::Value,
) -> anyhow::Result<CommandResult> {
  let payload: RestorePayload = parse_payload(payload)?;
  for name in [
    &payload.backup_id,
    &payload.namespace,
    &payload.db_name,
  ] {
    if !valid_resource_name(name) {
      anyhow::bail!("invalid restore identifier {name:?}");
    }
  }

  let outcome = restore_inner(&payload).await;

  let pod = format!("{}-0", payload.db_name);
  let remote_path = format!("/tmp/restore-{}", payload.backup_id);
  let local_path = local_restore_path(&payload.backup_id);
  cleanup(&payload.namespace, &pod, &remote_path, &local_path)
    .await;

  match outcome {
    Ok(result) => Ok(result),
    Err(e) => Ok(CommandResult::failed(format!("{e:#}"), None)),
  }
}

async fn restore_inner(
  payload: &RestorePayload,
) -> anyhow::Result<CommandResult> {
  let pod = format!("{}-0", payload.db_name);
  let remote_path = format!("/tmp/restore-{}", payload.backup_id);
  let local_path = local_restore_path(&payload.backup_id);

  control_plane()
    .download_from_presigned_url(
      &payload.download_url,
      &local_path,
    )
    .await
    .context("backup download failed")?;

  let copy = format!(
    "kubectl exec -i -n {} {} -- sh -c {} < {}",
    quote(&payload.namespace),
    quote(&pod),
    quote(&format!("cat > {remote_path}")),
    quote(&local_path.display().to_string()),
  );
  let copied = kube::execute(&copy, COPY_TIMEOUT).await;
  if !copied.success {
    anyhow::bail!(
      "failed to copy backup into pod: {}",
      copied.error_message()
    );
  }

  let restore = restore_command(payload, &remote_path);
  let restored = kube::exec_in_pod(
    &payload.namespace,
    &pod,
    &restore,
    RESTORE_TIMEOUT,
  )
  .await;
  if !restored.success {
    anyhow::bail!(
      "restore failed: {}",
      restored.error_message()
    );
  }

  // Redis only reads its dump on startup.
  if payload.kind == DatabaseKind::Redis {
    let restarted = kube::rollout_restart(
      &payload.namespace,
      "statefulset",
      &payload.db_name,
    )
    .await;
    if !restarted.success {
      anyhow::bail!(
        "failed to restart redis after restore: {}",
        restarted.error_message()
      );
    }
  }

  Ok(CommandResult::ok(Some(format!(
    "backup {} restored into {}",
    payload.backup_id, payload.db_name
  ))))
}

fn dump_command(
  payload: &BackupPayload,
  remote_path: &str,
) -> String {
  match payload.kind {
    DatabaseKind::Postgres => format!(
      "pg_dump -U {} -d {} -F c -f {remote_path}",
      quote(&payload.username),
      quote(payload.database()),
    ),
    DatabaseKind::Mongodb => format!(
      "mongodump --archive={remote_path} -u {} -p \"$MONGO_INITDB_ROOT_PASSWORD\" --authenticationDatabase admin --db {}",
      quote(&payload.username),
      quote(payload.database()),
    ),
    DatabaseKind::Redis => format!(
      "redis-cli -a \"$REDIS_PASSWORD\" SAVE && cp /data/dump.rdb {remote_path}"
    ),
  }
}

fn restore_command(
  payload: &RestorePayload,
  remote_path: &str,
) -> String {
  match payload.kind {
    DatabaseKind::Postgres => format!(
      "pg_restore -U {} -d {} --clean --if-exists {remote_path}",
      quote(&payload.username),
      quote(payload.database()),
    ),
    DatabaseKind::Mongodb => format!(
      "mongorestore --archive={remote_path} --drop -u {} -p \"$MONGO_INITDB_ROOT_PASSWORD\" --authenticationDatabase admin",
      quote(&payload.username),
    ),
    DatabaseKind::Redis => {
      format!("cp {remote_path} /data/dump.rdb")
    }
  }
}

fn local_backup_path(backup_id: &str) -> PathBuf {
  PathBuf::from(format!("/tmp/deploypilot-backup-{backup_id}"))
}

fn local_restore_path(backup_id: &str) -> PathBuf {
  PathBuf::from(format!("/tmp/deploypilot-restore-{backup_id}"))
}

/// Best-effort removal of in-pod and local temp files.
async fn cleanup(
  namespace: &str,
  pod: &str,
  remote_path: &str,
  local_path: &std::path::Path,
) {
  let removed = kube::exec_in_pod(
    namespace,
    pod,
    &format!("rm -f {remote_path}"),
    CLEANUP_TIMEOUT,
  )
  .await;
  if !removed.success {
    tracing::debug!(
      "failed to remove {remote_path} in pod {pod} | {}",
      removed.error_message()
    );
  }
  if let Err(e) = tokio::fs::remove_file(local_path).await
    && e.kind() != std::io::ErrorKind::NotFound
  {
    tracing::debug!(
      "failed to remove {} | {e}",
      local_path.display()
    );
  }
}

async fn report_status(
  backup_id: &str,
  status: &str,
  message: Option<String>,
  size_bytes: Option<u64>,
) {
  let body = BackupStatusBody {
    status: status.to_string(),
    message,
    size_bytes,
  };
  if let Err(e) = control_plane()
    .update_backup_status(backup_id, &body)
    .await
  {
    tracing::debug!(
      "failed to update backup {backup_id} status | {e:#}"
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn backup_payload(kind: DatabaseKind) -> BackupPayload {
    BackupPayload {
      backup_id: String::from("b1"),
      namespace: String::from("dp-u1"),
      db_name: String::from("main-db"),
      kind,
      username: String::from("admin"),
      database: None,
    }
  }

  #[test]
  fn postgres_dump_shape() {
    let command = dump_command(
      &backup_payload(DatabaseKind::Postgres),
      "/tmp/backup-b1",
    );
    assert_eq!(
      command,
      "pg_dump -U 'admin' -d 'main-db' -F c -f /tmp/backup-b1"
    );
  }

  #[test]
  fn mongo_dump_uses_pod_env_password() {
    let command = dump_command(
      &backup_payload(DatabaseKind::Mongodb),
      "/tmp/backup-b1",
    );
    assert!(
      command.contains("-p \"$MONGO_INITDB_ROOT_PASSWORD\"")
    );
    assert!(command.contains("--archive=/tmp/backup-b1"));
  }

  #[test]
  fn redis_dump_saves_then_copies() {
    let command = dump_command(
      &backup_payload(DatabaseKind::Redis),
      "/tmp/backup-b1",
    );
    assert!(command.starts_with("redis-cli"));
    assert!(command.contains("cp /data/dump.rdb /tmp/backup-b1"));
  }

  #[test]
  fn temp_paths_are_keyed_by_backup_id() {
    assert_eq!(
      local_backup_path("b1"),
      PathBuf::from("/tmp/deploypilot-backup-b1")
    );
    assert_eq!(
      local_restore_path("b1"),
      PathBuf::from("/tmp/deploypilot-restore-b1")
    );
  }
}
