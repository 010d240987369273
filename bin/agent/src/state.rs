use std::{
  collections::HashSet,
  sync::{Arc, Mutex, OnceLock},
};

use anyhow::Context;
use arc_swap::ArcSwapOption;
use deploypilot_client::{
  ControlPlaneClient, entities::agent::AgentIdentity,
};

use crate::{config::agent_config, relay::LogRelay};

pub fn control_plane() -> &'static ControlPlaneClient {
  static CONTROL_PLANE: OnceLock<ControlPlaneClient> =
    OnceLock::new();
  CONTROL_PLANE.get_or_init(|| {
    let config = agent_config();
    ControlPlaneClient::new(
      &config.backend_url,
      &config.server_token,
    )
    .expect("failed to initialize control plane client")
  })
}

pub fn log_relay() -> &'static LogRelay {
  static LOG_RELAY: OnceLock<LogRelay> = OnceLock::new();
  LOG_RELAY
    .get_or_init(|| LogRelay::spawn(control_plane().clone()))
}

/// In-flight command ids. All access goes through this lock; its
/// size against the configured ceiling is the admission gate.
pub fn live_commands() -> &'static Mutex<HashSet<String>> {
  static LIVE_COMMANDS: OnceLock<Mutex<HashSet<String>>> =
    OnceLock::new();
  LIVE_COMMANDS.get_or_init(Default::default)
}

pub fn live_command_count() -> usize {
  live_commands().lock().unwrap().len()
}

pub fn remove_live_command(id: &str) {
  live_commands().lock().unwrap().remove(id);
}

pub fn identity() -> &'static ArcSwapOption<AgentIdentity> {
  static IDENTITY: OnceLock<ArcSwapOption<AgentIdentity>> =
    OnceLock::new();
  IDENTITY.get_or_init(Default::default)
}

pub fn set_identity(value: AgentIdentity) {
  identity().store(Some(Arc::new(value)));
}

/// Registration failed at startup: re-attempt once, lazily, when
/// an operation actually needs the platform identity.
pub async fn ensure_registered()
-> anyhow::Result<Arc<AgentIdentity>> {
  if let Some(current) = identity().load_full() {
    return Ok(current);
  }
  let request = crate::resources::register_request().await;
  let registered = control_plane()
    .register(&request)
    .await
    .context("agent is not registered with the control plane")?;
  set_identity(registered);
  clear_last_error();
  identity()
    .load_full()
    .context("identity vanished after registration")
}

pub fn last_error() -> &'static ArcSwapOption<String> {
  static LAST_ERROR: OnceLock<ArcSwapOption<String>> =
    OnceLock::new();
  LAST_ERROR.get_or_init(Default::default)
}

pub fn set_last_error(message: impl Into<String>) {
  last_error().store(Some(Arc::new(message.into())));
}

pub fn clear_last_error() {
  last_error().store(None);
}
