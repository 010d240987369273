#[macro_use]
extern crate tracing;

use std::net::SocketAddr;

use anyhow::Context;

use crate::config::agent_config;

mod api;
mod config;
mod control;
mod dispatcher;
mod handlers;
mod heartbeat;
mod relay;
mod resources;
mod state;

async fn app() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();
  let config = agent_config();
  logger::init(&config.logging)?;

  info!(
    "DeployPilot Agent version: v{}",
    env!("CARGO_PKG_VERSION")
  );

  // Registration is retried with backoff; exhaustion leaves the
  // agent degraded and it re-registers lazily when an operation
  // needs the platform identity.
  let request = resources::register_request().await;
  match state::control_plane()
    .register_with_backoff(&request)
    .await
  {
    Ok(identity) => {
      info!(
        "registered with control plane as {} ({})",
        identity.name, identity.id
      );
      state::set_identity(identity);
    }
    Err(e) => {
      error!(
        "registration exhausted, continuing degraded | {e:#}"
      );
      state::set_last_error(format!(
        "registration failed: {e:#}"
      ));
    }
  }

  let shutdown = tokio_util::sync::CancellationToken::new();
  control::spawn_control_loop(shutdown.clone());
  heartbeat::spawn_heartbeat_loop(shutdown.clone());
  resources::spawn_resource_report_loop(shutdown.clone());

  let socket_addr = SocketAddr::from(([0, 0, 0, 0], config.port));
  info!("DeployPilot Agent starting on http://{socket_addr}");
  let server = axum_server::bind(socket_addr)
    .serve(api::router().into_make_service());

  tokio::select! {
    res = server => res.context("failed to start http server")?,
    _ = shutdown_signal() => {}
  }

  // Stop admitting, let in-flight handlers finish, say goodbye.
  info!("shutdown requested, draining in-flight commands");
  shutdown.cancel();
  drain_in_flight().await;
  heartbeat::send_final().await;
  info!("drained, exiting");
  Ok(())
}

async fn shutdown_signal() {
  let mut term = tokio::signal::unix::signal(
    tokio::signal::unix::SignalKind::terminate(),
  )
  .expect("failed to install SIGTERM handler");
  tokio::select! {
    _ = tokio::signal::ctrl_c() => {}
    _ = term.recv() => {}
  }
}

async fn drain_in_flight() {
  loop {
    let remaining = state::live_command_count();
    if remaining == 0 {
      return;
    }
    info!("waiting on {remaining} in-flight command(s)");
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  app().await
}
