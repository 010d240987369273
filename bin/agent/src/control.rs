//! The poll loop: fetch pending commands, admit them under the
//! concurrency ceiling, spawn their handlers. An initial tick
//! fires immediately on startup; polling failures are logged and
//! never propagate.

use std::collections::HashSet;

use deploypilot_client::entities::command::{
  Command, CommandStatus,
};
use tokio_util::sync::CancellationToken;

use crate::{
  config::agent_config,
  state::{
    clear_last_error, control_plane, live_commands,
    set_last_error,
  },
};

pub fn spawn_control_loop(shutdown: CancellationToken) {
  tokio::spawn(async move {
    let mut interval =
      tokio::time::interval(agent_config().poll_interval);
    interval.set_missed_tick_behavior(
      tokio::time::MissedTickBehavior::Delay,
    );
    loop {
      tokio::select! {
        _ = interval.tick() => {}
        _ = shutdown.cancelled() => return,
      }
      if shutdown.is_cancelled() {
        return;
      }
      tick().await;
    }
  });
}

async fn tick() {
  let commands = match control_plane().pending_commands().await {
    Ok(commands) => {
      // A good cycle resolves whatever the last one surfaced.
      clear_last_error();
      commands
    }
    Err(e) => {
      warn!("failed to poll for commands | {e:#}");
      set_last_error(format!("command poll failed: {e:#}"));
      return;
    }
  };
  if commands.is_empty() {
    return;
  }
  let admitted = {
    let mut live = live_commands().lock().unwrap();
    admit_commands(
      commands,
      &mut live,
      agent_config().max_concurrent_commands,
    )
  };
  for command in admitted {
    debug!(
      "admitting command {} ({})",
      command.id, command.kind
    );
    tokio::spawn(crate::dispatcher::execute(command));
  }
}

/// Admission under the ceiling. Ids already in flight and
/// non-pending commands are skipped; once the live-set is full the
/// rest of the batch waits for a later tick.
pub fn admit_commands(
  commands: Vec<Command>,
  live: &mut HashSet<String>,
  ceiling: usize,
) -> Vec<Command> {
  let mut admitted = Vec::new();
  for command in commands {
    if command.status != CommandStatus::Pending
      || live.contains(&command.id)
    {
      continue;
    }
    if live.len() >= ceiling {
      break;
    }
    live.insert(command.id.clone());
    admitted.push(command);
  }
  admitted
}

#[cfg(test)]
mod tests {
  use deploypilot_client::entities::command::CommandKind;

  use super::*;

  fn command(id: &str, status: CommandStatus) -> Command {
    Command {
      id: id.to_string(),
      kind: CommandKind::Stop,
      payload: serde_json::Value::Null,
      status,
      created_at: None,
    }
  }

  #[test]
  fn burst_is_capped_at_ceiling() {
    let mut live = HashSet::new();
    let commands = (0..10)
      .map(|i| command(&format!("c{i}"), CommandStatus::Pending))
      .collect();
    let admitted = admit_commands(commands, &mut live, 3);
    assert_eq!(admitted.len(), 3);
    assert_eq!(live.len(), 3);
    // the rest of the burst is untouched, to be re-offered later
    assert!(!live.contains("c3"));
  }

  #[test]
  fn in_flight_and_non_pending_are_skipped() {
    let mut live = HashSet::new();
    live.insert(String::from("c0"));
    let commands = vec![
      command("c0", CommandStatus::Pending),
      command("c1", CommandStatus::Running),
      command("c2", CommandStatus::Pending),
    ];
    let admitted = admit_commands(commands, &mut live, 3);
    assert_eq!(admitted.len(), 1);
    assert_eq!(admitted[0].id, "c2");
  }

  #[test]
  fn slots_free_up_across_ticks() {
    let mut live = HashSet::new();
    let first = (0..5)
      .map(|i| command(&format!("c{i}"), CommandStatus::Pending))
      .collect();
    assert_eq!(admit_commands(first, &mut live, 3).len(), 3);
    live.remove("c0");
    let second = (0..5)
      .map(|i| command(&format!("c{i}"), CommandStatus::Pending))
      .collect();
    let admitted = admit_commands(second, &mut live, 3);
    assert_eq!(admitted.len(), 1);
    assert_eq!(admitted[0].id, "c3");
  }
}
