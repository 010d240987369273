//! Local HTTP surface: health for the load balancer / operator,
//! and thin log-query / log-stream framing over `kubectl logs`.

use std::time::Duration;

use axum::{
  Json, Router,
  body::Body,
  extract::{Path, Query},
  routing::get,
};
use serde::{Deserialize, Serialize};

use crate::state::identity;

/// Follow streams are capped; clients reconnect.
const FOLLOW_TIMEOUT: Duration = Duration::from_secs(3600);

pub fn router() -> Router {
  Router::new()
    .route("/health", get(health))
    .route("/logs/{namespace}/{app}", get(logs))
    .route("/logs/{namespace}/{app}/stream", get(stream_logs))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
  status: &'static str,
  timestamp: String,
  registered: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  agent_id: Option<String>,
}

async fn health() -> Json<HealthResponse> {
  let identity = identity().load_full();
  Json(HealthResponse {
    status: if identity.is_some() { "ok" } else { "degraded" },
    timestamp: chrono::Utc::now().to_rfc3339(),
    registered: identity.is_some(),
    agent_id: identity.map(|identity| identity.id.clone()),
  })
}

#[derive(Deserialize)]
struct LogsQuery {
  lines: Option<u32>,
}

async fn logs(
  Path((namespace, app)): Path<(String, String)>,
  Query(query): Query<LogsQuery>,
) -> serror::Result<String> {
  let output = kube::pod_logs(
    &namespace,
    &app,
    query.lines.unwrap_or(100),
  )
  .await;
  if output.success {
    Ok(output.stdout)
  } else {
    Err(
      anyhow::anyhow!("{}", output.error_message())
        .context("failed to query logs")
        .into(),
    )
  }
}

async fn stream_logs(
  Path((namespace, app)): Path<(String, String)>,
) -> serror::Result<Body> {
  let args = kube::follow_logs_args(&namespace, &app)?;
  let (tx, rx) = tokio::sync::mpsc::channel::<
    Result<bytes::Bytes, std::io::Error>,
  >(256);
  tokio::spawn(async move {
    let args: Vec<&str> =
      args.iter().map(String::as_str).collect();
    let res = shell::spawn_streaming(
      "kubectl",
      &args,
      FOLLOW_TIMEOUT,
      |line| {
        // A lagging / disconnected client just loses lines.
        let _ =
          tx.try_send(Ok(bytes::Bytes::from(format!("{line}\n"))));
      },
    )
    .await;
    if let Err(e) = res {
      debug!("log follow stream ended | {e:#}");
    }
  });
  Ok(Body::from_stream(
    tokio_stream::wrappers::ReceiverStream::new(rx),
  ))
}
