//! Custom domain handlers: render and apply (or delete) the
//! per-domain Ingress.

use deploypilot_client::entities::{
  command::{CommandResult, DomainPayload},
  valid_resource_name,
};
use manifests::{ingress_name, render_app_ingress};

use super::{parse_payload, result_from};

pub async fn add(
  payload: &serde_json::Value,
) -> anyhow::Result<CommandResult> {
  let payload: DomainPayload = parse_payload(payload)?;
  for name in [&payload.namespace, &payload.app_name] {
    if !valid_resource_name(name) {
      anyhow::bail!("invalid kubernetes name: {name:?}");
    }
  }
  if !valid_resource_name(&payload.domain) {
    anyhow::bail!("invalid domain {:?}", payload.domain);
  }
  let manifest = render_app_ingress(
    &payload.namespace,
    &payload.app_name,
    &payload.domain,
    payload.port,
  );
  let output = kube::apply_manifest(&manifest).await;
  Ok(result_from(output))
}

/// Tolerant of an already-absent Ingress.
pub async fn remove(
  payload: &serde_json::Value,
) -> anyhow::Result<CommandResult> {
  let payload: DomainPayload = parse_payload(payload)?;
  if !valid_resource_name(&payload.domain) {
    anyhow::bail!("invalid domain {:?}", payload.domain);
  }
  let name = ingress_name(&payload.app_name, &payload.domain);
  let output =
    kube::delete_resource(&payload.namespace, "ingress", &name)
      .await;
  Ok(result_from(output))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn rejects_invalid_domains() {
    let payload = serde_json::json!({
      "namespace": "dp-u1",
      "appName": "hello",
      "domain": "bad domain!",
    });
    let result = add(&payload).await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn rejects_invalid_namespace_and_app() {
    let payload = serde_json::json!({
      "namespace": "Bad Namespace",
      "appName": "hello",
      "domain": "app.example.com",
    });
    assert!(add(&payload).await.is_err());

    let payload = serde_json::json!({
      "namespace": "dp-u1",
      "appName": "Hello App",
      "domain": "app.example.com",
    });
    assert!(add(&payload).await.is_err());
  }
}
