//! Thin app lifecycle handlers over the kube driver.

use deploypilot_client::entities::command::{
  AppTargetPayload, CommandResult, EnvUpdatePayload,
  NamespacePayload,
};

use super::{parse_payload, result_from};

pub async fn stop(
  payload: &serde_json::Value,
) -> anyhow::Result<CommandResult> {
  let payload: AppTargetPayload = parse_payload(payload)?;
  let output =
    kube::stop(&payload.namespace, &payload.app_name).await;
  Ok(result_from(output))
}

pub async fn restart(
  payload: &serde_json::Value,
) -> anyhow::Result<CommandResult> {
  let payload: AppTargetPayload = parse_payload(payload)?;
  let output =
    kube::restart(&payload.namespace, &payload.app_name).await;
  Ok(result_from(output))
}

/// Removes the whole app: helper script first, then the
/// not-found-tolerant composite delete for anything it left
/// behind.
pub async fn delete(
  payload: &serde_json::Value,
) -> anyhow::Result<CommandResult> {
  let payload: AppTargetPayload = parse_payload(payload)?;
  let script =
    kube::delete_app(&payload.namespace, &payload.app_name).await;
  if !script.success {
    return Ok(result_from(script));
  }
  let output = kube::delete_deployment(
    &payload.namespace,
    &payload.app_name,
  )
  .await;
  Ok(result_from(output))
}

pub async fn create_namespace(
  payload: &serde_json::Value,
) -> anyhow::Result<CommandResult> {
  let payload: NamespacePayload = parse_payload(payload)?;
  let output = kube::ensure_namespace(
    &payload.user_id,
    payload.registry_token.as_deref(),
  )
  .await;
  Ok(result_from(output))
}

pub async fn update_env(
  payload: &serde_json::Value,
) -> anyhow::Result<CommandResult> {
  let payload: EnvUpdatePayload = parse_payload(payload)?;
  let output = kube::set_env_vars(
    &payload.namespace,
    &payload.app_name,
    &payload.env_vars,
  )
  .await;
  Ok(result_from(output))
}
