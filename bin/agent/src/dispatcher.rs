//! Per-command lifecycle: ack, running, execute, result. The
//! live-set entry is removed only after the result send attempt,
//! so admission keeps counting the command until it is fully
//! retired.

use deploypilot_client::entities::command::Command;

use crate::state::{control_plane, remove_live_command};

pub async fn execute(command: Command) {
  let client = control_plane();
  let id = command.id.clone();

  if let Err(e) = client.ack_command(&id).await {
    warn!("failed to ack command {id} | {e:#}");
  }
  if let Err(e) = client.mark_running(&id).await {
    warn!("failed to mark command {id} running | {e:#}");
  }

  let result = crate::handlers::run(&command).await;
  if result.success {
    info!("command {id} ({}) completed", command.kind);
  } else {
    warn!(
      "command {id} ({}) failed | {}",
      command.kind,
      result.error.as_deref().unwrap_or("unknown error")
    );
  }

  // The control plane re-offers work that never gets a result, so
  // a failed send is logged but does not raise.
  if let Err(e) = client.send_result(&id, &result).await {
    error!("failed to send result for command {id} | {e:#}");
  }

  remove_live_command(&id);
}
