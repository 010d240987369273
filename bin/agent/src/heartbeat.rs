//! Periodic liveness: status + resources + running pods.
//! Delivery failures are swallowed; the control plane marks the
//! agent offline on its own schedule if heartbeats stop.

use deploypilot_client::entities::agent::{
  AgentStatus, HeartbeatSnapshot,
};
use tokio_util::sync::CancellationToken;

use crate::{
  config::agent_config,
  state::{control_plane, last_error, live_command_count},
};

pub fn derive_status(
  error: Option<&str>,
  in_flight: usize,
  ceiling: usize,
) -> AgentStatus {
  if error.is_some() {
    AgentStatus::Error
  } else if in_flight >= ceiling {
    AgentStatus::Busy
  } else {
    AgentStatus::Online
  }
}

async fn snapshot() -> HeartbeatSnapshot {
  let error_message =
    last_error().load_full().map(|e| e.as_ref().clone());
  let status = derive_status(
    error_message.as_deref(),
    live_command_count(),
    agent_config().max_concurrent_commands,
  );
  HeartbeatSnapshot {
    status,
    resources: crate::resources::collect().await,
    running_pods: kube::list_running_pods().await,
    error_message,
  }
}

async fn beat() {
  let snapshot = snapshot().await;
  if let Err(e) = control_plane().heartbeat(&snapshot).await {
    tracing::debug!("heartbeat delivery failed | {e:#}");
  }
}

pub fn spawn_heartbeat_loop(shutdown: CancellationToken) {
  tokio::spawn(async move {
    let mut interval =
      tokio::time::interval(agent_config().heartbeat_interval);
    interval.set_missed_tick_behavior(
      tokio::time::MissedTickBehavior::Delay,
    );
    loop {
      tokio::select! {
        _ = interval.tick() => {}
        _ = shutdown.cancelled() => return,
      }
      beat().await;
    }
  });
}

/// Best-effort parting heartbeat during shutdown.
pub async fn send_final() {
  beat().await;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_derivation() {
    assert_eq!(derive_status(None, 0, 3), AgentStatus::Online);
    assert_eq!(derive_status(None, 2, 3), AgentStatus::Online);
    assert_eq!(derive_status(None, 3, 3), AgentStatus::Busy);
    assert_eq!(
      derive_status(Some("boom"), 0, 3),
      AgentStatus::Error
    );
    // error wins over busy
    assert_eq!(
      derive_status(Some("boom"), 3, 3),
      AgentStatus::Error
    );
  }
}
