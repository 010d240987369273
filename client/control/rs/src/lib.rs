//! Typed client for the DeployPilot control plane.
//!
//! All agent-facing endpoints live under `/api/agents` and are
//! authenticated with the `X-Server-Token` header. Deployment log
//! and status relays are best-effort with a short deadline; the
//! callers treat failures as lossy-stream drops.

use std::time::Duration;

use anyhow::{Context, anyhow};
use serde::{Serialize, de::DeserializeOwned};

pub mod entities;

use crate::entities::{
  agent::{
    AgentIdentity, HeartbeatSnapshot, RegisterRequest,
    SystemResources,
  },
  command::{Command, CommandResult},
  deployment::{
    BackupStatusBody, BackupUploadUrl, DeploymentLogBody,
    DeploymentStatusBody,
  },
};

/// Default timeout on control plane requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline on fire-and-forget log / status relays.
const RELAY_TIMEOUT: Duration = Duration::from_secs(5);

const REGISTER_ATTEMPTS: u32 = 10;

#[derive(Clone)]
pub struct ControlPlaneClient {
  client: reqwest::Client,
  /// No default timeout, used for object store transfers.
  transfer_client: reqwest::Client,
  base_url: String,
}

impl ControlPlaneClient {
  pub fn new(
    backend_url: &str,
    server_token: &str,
  ) -> anyhow::Result<ControlPlaneClient> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
      "X-Server-Token",
      server_token
        .parse()
        .context("SERVER_TOKEN is not a valid header value")?,
    );
    let client = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(REQUEST_TIMEOUT)
      .build()
      .context("Failed to build control plane http client")?;
    let transfer_client = reqwest::Client::builder()
      .build()
      .context("Failed to build transfer http client")?;
    Ok(ControlPlaneClient {
      client,
      transfer_client,
      base_url: backend_url.trim_end_matches('/').to_string(),
    })
  }

  fn agents_url(&self, path: &str) -> String {
    format!("{}/api/agents/{path}", self.base_url)
  }

  pub async fn register(
    &self,
    request: &RegisterRequest,
  ) -> anyhow::Result<AgentIdentity> {
    self
      .post(&self.agents_url("register"), request)
      .await
      .context("Failed to register agent with control plane")
  }

  /// Registration with exponential backoff: 1s doubling to a 60s
  /// cap, ten attempts. Exhaustion is an error; the caller keeps
  /// running degraded and re-registers lazily.
  pub async fn register_with_backoff(
    &self,
    request: &RegisterRequest,
  ) -> anyhow::Result<AgentIdentity> {
    let mut last_error = None;
    for attempt in 0..REGISTER_ATTEMPTS {
      match self.register(request).await {
        Ok(identity) => return Ok(identity),
        Err(e) => {
          let delay = register_backoff(attempt);
          tracing::warn!(
            "Registration attempt {} failed, retrying in {delay:?} | {e:#}",
            attempt + 1,
          );
          last_error = Some(e);
          tokio::time::sleep(delay).await;
        }
      }
    }
    Err(
      last_error
        .unwrap_or_else(|| anyhow!("registration never attempted")),
    )
  }

  pub async fn heartbeat(
    &self,
    snapshot: &HeartbeatSnapshot,
  ) -> anyhow::Result<()> {
    self
      .post::<_, serde_json::Value>(
        &self.agents_url("heartbeat"),
        snapshot,
      )
      .await
      .context("Failed to send heartbeat")?;
    Ok(())
  }

  pub async fn pending_commands(
    &self,
  ) -> anyhow::Result<Vec<Command>> {
    self
      .get(&self.agents_url("commands"))
      .await
      .context("Failed to fetch pending commands")
  }

  pub async fn ack_command(&self, id: &str) -> anyhow::Result<()> {
    let url = self
      .agents_url(&format!("commands/{}/ack", urlencoding::encode(id)));
    self
      .patch::<_, serde_json::Value>(&url, &serde_json::json!({}))
      .await
      .with_context(|| format!("Failed to ack command {id}"))?;
    Ok(())
  }

  pub async fn mark_running(&self, id: &str) -> anyhow::Result<()> {
    let url = self.agents_url(&format!(
      "commands/{}/running",
      urlencoding::encode(id)
    ));
    self
      .patch::<_, serde_json::Value>(&url, &serde_json::json!({}))
      .await
      .with_context(|| format!("Failed to mark command {id} running"))?;
    Ok(())
  }

  pub async fn send_result(
    &self,
    id: &str,
    result: &CommandResult,
  ) -> anyhow::Result<()> {
    let url = self.agents_url(&format!(
      "commands/{}/result",
      urlencoding::encode(id)
    ));
    self
      .patch::<_, serde_json::Value>(&url, result)
      .await
      .with_context(|| format!("Failed to send result for command {id}"))?;
    Ok(())
  }

  pub async fn report_resources(
    &self,
    resources: &SystemResources,
  ) -> anyhow::Result<()> {
    self
      .post::<_, serde_json::Value>(
        &self.agents_url("resources"),
        resources,
      )
      .await
      .context("Failed to report resources")?;
    Ok(())
  }

  /// Best-effort: short deadline, caller swallows errors.
  pub async fn send_deployment_log(
    &self,
    deployment_id: &str,
    body: &DeploymentLogBody,
  ) -> anyhow::Result<()> {
    let url = format!(
      "{}/api/deployments/{}/logs",
      self.base_url,
      urlencoding::encode(deployment_id)
    );
    let res = self
      .client
      .post(&url)
      .timeout(RELAY_TIMEOUT)
      .json(body)
      .send()
      .await
      .context("log relay send failed")?;
    expect_success(res, "deployment log").await?;
    Ok(())
  }

  /// Best-effort: short deadline, caller swallows errors.
  pub async fn update_deployment_status(
    &self,
    deployment_id: &str,
    body: &DeploymentStatusBody,
  ) -> anyhow::Result<()> {
    let url = format!(
      "{}/api/deployments/{}/status",
      self.base_url,
      urlencoding::encode(deployment_id)
    );
    let res = self
      .client
      .patch(&url)
      .timeout(RELAY_TIMEOUT)
      .json(body)
      .send()
      .await
      .context("status relay send failed")?;
    expect_success(res, "deployment status").await?;
    Ok(())
  }

  pub async fn backup_upload_url(
    &self,
    backup_id: &str,
  ) -> anyhow::Result<String> {
    let url = self.agents_url(&format!(
      "backups/{}/upload-url",
      urlencoding::encode(backup_id)
    ));
    let res: BackupUploadUrl = self
      .get(&url)
      .await
      .with_context(|| format!("Failed to issue upload url for backup {backup_id}"))?;
    Ok(res.url)
  }

  pub async fn update_backup_status(
    &self,
    backup_id: &str,
    body: &BackupStatusBody,
  ) -> anyhow::Result<()> {
    let url = self.agents_url(&format!(
      "backups/{}/status",
      urlencoding::encode(backup_id)
    ));
    self
      .patch::<_, serde_json::Value>(&url, body)
      .await
      .with_context(|| format!("Failed to update status for backup {backup_id}"))?;
    Ok(())
  }

  /// PUT a local file to a pre-signed object store url.
  /// No auth header, no default timeout (caller bounds duration).
  pub async fn upload_to_presigned_url(
    &self,
    url: &str,
    path: &std::path::Path,
  ) -> anyhow::Result<u64> {
    let file = tokio::fs::File::open(path).await.with_context(|| {
      format!("Failed to open backup file at {}", path.display())
    })?;
    let len = file
      .metadata()
      .await
      .context("Failed to stat backup file")?
      .len();
    let res = self
      .transfer_client
      .put(url)
      .header(reqwest::header::CONTENT_LENGTH, len)
      .body(reqwest::Body::wrap_stream(
        tokio_util::io::ReaderStream::new(file),
      ))
      .send()
      .await
      .context("Failed to upload backup to object store")?;
    expect_success(res, "backup upload").await?;
    Ok(len)
  }

  /// Download from a pre-signed object store url to a local file.
  pub async fn download_from_presigned_url(
    &self,
    url: &str,
    path: &std::path::Path,
  ) -> anyhow::Result<u64> {
    use futures::StreamExt;
    use tokio::io::AsyncWriteExt;
    let res = self
      .transfer_client
      .get(url)
      .send()
      .await
      .context("Failed to download backup from object store")?;
    let res = expect_success(res, "backup download").await?;
    let mut file =
      tokio::fs::File::create(path).await.with_context(|| {
        format!("Failed to create restore file at {}", path.display())
      })?;
    let mut stream = res.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
      let chunk =
        chunk.context("backup download stream interrupted")?;
      written += chunk.len() as u64;
      file
        .write_all(&chunk)
        .await
        .context("Failed writing restore file")?;
    }
    file.flush().await.context("Failed flushing restore file")?;
    Ok(written)
  }

  async fn get<R: DeserializeOwned>(
    &self,
    url: &str,
  ) -> anyhow::Result<R> {
    let res = self.client.get(url).send().await.context("request failed")?;
    parse_json(res, url).await
  }

  async fn post<B: Serialize, R: DeserializeOwned>(
    &self,
    url: &str,
    body: &B,
  ) -> anyhow::Result<R> {
    let res = self
      .client
      .post(url)
      .json(body)
      .send()
      .await
      .context("request failed")?;
    parse_json(res, url).await
  }

  async fn patch<B: Serialize, R: DeserializeOwned>(
    &self,
    url: &str,
    body: &B,
  ) -> anyhow::Result<R> {
    let res = self
      .client
      .patch(url)
      .json(body)
      .send()
      .await
      .context("request failed")?;
    parse_json(res, url).await
  }
}

async fn expect_success(
  res: reqwest::Response,
  what: &str,
) -> anyhow::Result<reqwest::Response> {
  let status = res.status();
  if status.is_success() {
    return Ok(res);
  }
  let body = res.text().await.unwrap_or_default();
  Err(anyhow!("{what} request failed | {status} | {body}"))
}

async fn parse_json<R: DeserializeOwned>(
  res: reqwest::Response,
  url: &str,
) -> anyhow::Result<R> {
  let res = expect_success(res, url).await?;
  res
    .json()
    .await
    .with_context(|| format!("Failed to parse response from {url}"))
}

/// 1s doubling per attempt, capped at 60s.
pub fn register_backoff(attempt: u32) -> Duration {
  let secs = 1u64
    .checked_shl(attempt)
    .unwrap_or(u64::MAX)
    .min(60);
  Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn backoff_schedule() {
    assert_eq!(register_backoff(0), Duration::from_secs(1));
    assert_eq!(register_backoff(1), Duration::from_secs(2));
    assert_eq!(register_backoff(5), Duration::from_secs(32));
    assert_eq!(register_backoff(6), Duration::from_secs(60));
    assert_eq!(register_backoff(9), Duration::from_secs(60));
  }
}
