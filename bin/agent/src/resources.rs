//! Host resource snapshots for registration, heartbeat and the
//! periodic resource report.

use std::time::Duration;

use deploypilot_client::entities::agent::{
  RegisterRequest, SystemResources,
};
use tokio_util::sync::CancellationToken;

use crate::{config::agent_config, state::control_plane};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn collect() -> SystemResources {
  let cpu_cores = std::thread::available_parallelism()
    .map(|n| n.get() as u32)
    .unwrap_or(1);

  let (ram_mb, ram_used_mb) =
    match shell::run("free -m", PROBE_TIMEOUT).await {
      output if output.success => parse_free_output(
        &output.stdout,
      )
      .unwrap_or((0, 0)),
      _ => (0, 0),
    };

  let (disk_gb, disk_used_gb) =
    match shell::run("df -BG /", PROBE_TIMEOUT).await {
      output if output.success => {
        parse_df_output(&output.stdout).unwrap_or((0, 0))
      }
      _ => (0, 0),
    };

  SystemResources {
    cpu_cores,
    ram_mb,
    disk_gb,
    ram_used_mb: Some(ram_used_mb),
    disk_used_gb: Some(disk_used_gb),
  }
}

pub async fn register_request() -> RegisterRequest {
  let hostname = sysinfo::System::host_name()
    .unwrap_or_else(|| String::from("unknown"));
  RegisterRequest {
    hostname,
    kube_version: kube::kube_version().await,
    resources: collect().await,
  }
}

/// Parses `free -m`: the `Mem:` row carries total and used in MiB.
pub fn parse_free_output(stdout: &str) -> Option<(u64, u64)> {
  let line = stdout
    .lines()
    .find(|line| line.starts_with("Mem:"))?;
  let mut fields = line.split_whitespace().skip(1);
  let total = fields.next()?.parse().ok()?;
  let used = fields.next()?.parse().ok()?;
  Some((total, used))
}

/// Parses `df -BG /`: one data row with size and used in GiB
/// (`50G` style).
pub fn parse_df_output(stdout: &str) -> Option<(u64, u64)> {
  let line = stdout.lines().nth(1)?;
  let mut fields = line.split_whitespace().skip(1);
  let total = fields.next()?.trim_end_matches('G').parse().ok()?;
  let used = fields.next()?.trim_end_matches('G').parse().ok()?;
  Some((total, used))
}

pub fn spawn_resource_report_loop(shutdown: CancellationToken) {
  tokio::spawn(async move {
    let mut interval = tokio::time::interval(
      agent_config().resource_report_interval,
    );
    interval.set_missed_tick_behavior(
      tokio::time::MissedTickBehavior::Delay,
    );
    loop {
      tokio::select! {
        _ = interval.tick() => {}
        _ = shutdown.cancelled() => return,
      }
      let resources = collect().await;
      if let Err(e) =
        control_plane().report_resources(&resources).await
      {
        tracing::debug!("failed to report resources | {e:#}");
      }
    }
  });
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_free_output() {
    let stdout = "\
               total        used        free      shared  buff/cache   available
Mem:           15894        4242        8123         312        3528       11025
Swap:           2047           0        2047";
    assert_eq!(parse_free_output(stdout), Some((15894, 4242)));
  }

  #[test]
  fn parses_df_output() {
    let stdout = "\
Filesystem     1G-blocks  Used Available Use% Mounted on
/dev/sda1            50G   21G       27G  44% /";
    assert_eq!(parse_df_output(stdout), Some((50, 21)));
  }

  #[test]
  fn tolerates_garbage() {
    assert_eq!(parse_free_output("nonsense"), None);
    assert_eq!(parse_df_output(""), None);
  }
}
