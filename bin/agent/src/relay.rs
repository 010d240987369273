//! Fire-and-forget log / status push to the control plane.
//!
//! Everything goes through one bounded queue drained by a single
//! worker task. A full queue drops the message (logged at debug):
//! consumers treat deployment logs as a stream-with-loss, so
//! dropping beats blocking a build.

use deploypilot_client::{
  ControlPlaneClient,
  entities::deployment::{
    DeploymentLogBody, DeploymentLogLevel, DeploymentStatus,
    DeploymentStatusBody, DeploymentStep,
  },
};
use tokio::sync::mpsc;

const QUEUE_CAPACITY: usize = 256;

enum RelayMessage {
  Log {
    deployment_id: String,
    body: DeploymentLogBody,
  },
  Status {
    deployment_id: String,
    body: DeploymentStatusBody,
  },
}

pub struct LogRelay {
  tx: mpsc::Sender<RelayMessage>,
}

impl LogRelay {
  pub fn spawn(client: ControlPlaneClient) -> LogRelay {
    let (tx, mut rx) =
      mpsc::channel::<RelayMessage>(QUEUE_CAPACITY);
    tokio::spawn(async move {
      while let Some(message) = rx.recv().await {
        let res = match &message {
          RelayMessage::Log {
            deployment_id,
            body,
          } => {
            client.send_deployment_log(deployment_id, body).await
          }
          RelayMessage::Status {
            deployment_id,
            body,
          } => {
            client
              .update_deployment_status(deployment_id, body)
              .await
          }
        };
        if let Err(e) = res {
          tracing::debug!("log relay delivery failed | {e:#}");
        }
      }
    });
    LogRelay { tx }
  }

  pub fn send_log(
    &self,
    deployment_id: &str,
    message: &str,
    level: DeploymentLogLevel,
    step: DeploymentStep,
  ) {
    let message = RelayMessage::Log {
      deployment_id: deployment_id.to_string(),
      body: DeploymentLogBody {
        message: message.to_string(),
        level,
        timestamp: chrono::Utc::now().to_rfc3339(),
        step,
      },
    };
    if self.tx.try_send(message).is_err() {
      tracing::debug!("log relay queue full, dropping log line");
    }
  }

  pub fn update_status(
    &self,
    deployment_id: &str,
    status: DeploymentStatus,
    message: Option<String>,
  ) {
    let message = RelayMessage::Status {
      deployment_id: deployment_id.to_string(),
      body: DeploymentStatusBody { status, message },
    };
    if self.tx.try_send(message).is_err() {
      tracing::debug!(
        "log relay queue full, dropping status update"
      );
    }
  }
}

/// Adapter pointing the build pipeline's log stream at the relay.
pub struct BuildRelaySink {
  pub deployment_id: String,
}

impl builder::BuildLogSink for BuildRelaySink {
  fn line(&self, level: DeploymentLogLevel, message: &str) {
    crate::state::log_relay().send_log(
      &self.deployment_id,
      message,
      level,
      DeploymentStep::Build,
    );
  }
}
