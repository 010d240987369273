use std::{sync::OnceLock, time::Duration};

use clap::Parser;
use colored::Colorize;
use deploypilot_client::entities::logger::{
  LogConfig, LogLevel, StdioLogMode,
};
use serde::Deserialize;

/// Environment surface of the agent. Parsed once at startup.
#[derive(Deserialize)]
pub struct Env {
  /// Shared secret authenticating this agent against the control
  /// plane. Required; the process exits without it.
  pub server_token: Option<String>,
  #[serde(default = "default_backend_url")]
  pub backend_url: String,
  #[serde(default = "default_poll_interval_ms")]
  pub poll_interval_ms: u64,
  #[serde(default = "default_heartbeat_interval_ms")]
  pub heartbeat_interval_ms: u64,
  #[serde(default = "default_resource_report_interval_ms")]
  pub resource_report_interval_ms: u64,
  #[serde(default = "default_max_concurrent_commands")]
  pub max_concurrent_commands: usize,
  /// Local health / log-query surface.
  #[serde(default = "default_port")]
  pub port: u16,
  pub log_level: Option<LogLevel>,
  #[serde(default)]
  pub log_stdio: Option<StdioLogMode>,
  #[serde(default)]
  pub log_pretty: bool,
  #[serde(default)]
  pub otlp_endpoint: Option<String>,
}

fn default_backend_url() -> String {
  String::from("http://localhost:4000")
}

fn default_poll_interval_ms() -> u64 {
  10_000
}

fn default_heartbeat_interval_ms() -> u64 {
  30_000
}

fn default_resource_report_interval_ms() -> u64 {
  60_000
}

fn default_max_concurrent_commands() -> usize {
  3
}

fn default_port() -> u16 {
  3000
}

#[derive(Parser)]
#[command(
  name = "deploypilot-agent",
  about = "DeployPilot node agent",
  version
)]
pub struct CliArgs {
  /// Override the log level (LOG_LEVEL)
  #[arg(long)]
  pub log_level: Option<tracing::Level>,
  /// Override the local http port (PORT)
  #[arg(long)]
  pub port: Option<u16>,
}

pub struct AgentConfig {
  pub server_token: String,
  pub backend_url: String,
  pub poll_interval: Duration,
  pub heartbeat_interval: Duration,
  pub resource_report_interval: Duration,
  pub max_concurrent_commands: usize,
  pub port: u16,
  pub logging: LogConfig,
}

pub fn agent_config() -> &'static AgentConfig {
  static AGENT_CONFIG: OnceLock<AgentConfig> = OnceLock::new();
  AGENT_CONFIG.get_or_init(|| {
    let env: Env = envy::from_env()
      .expect("failed to parse agent environment");
    let args = CliArgs::parse();

    let Some(server_token) =
      env.server_token.filter(|token| !token.is_empty())
    else {
      println!(
        "{}: SERVER_TOKEN is required, exiting",
        "ERROR".red()
      );
      std::process::exit(1);
    };

    AgentConfig {
      server_token,
      backend_url: env.backend_url,
      poll_interval: Duration::from_millis(env.poll_interval_ms),
      heartbeat_interval: Duration::from_millis(
        env.heartbeat_interval_ms,
      ),
      resource_report_interval: Duration::from_millis(
        env.resource_report_interval_ms,
      ),
      max_concurrent_commands: env.max_concurrent_commands,
      port: args.port.unwrap_or(env.port),
      logging: LogConfig {
        level: args
          .log_level
          .map(LogLevel::from)
          .or(env.log_level)
          .unwrap_or_default(),
        stdio: env.log_stdio.unwrap_or_default(),
        pretty: env.log_pretty,
        otlp_endpoint: env.otlp_endpoint.unwrap_or_default(),
        ..Default::default()
      },
    }
  })
}
