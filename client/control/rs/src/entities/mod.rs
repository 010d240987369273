use serde::{Deserialize, Serialize};
use typeshare::typeshare;

/// [AgentIdentity], [HeartbeatSnapshot] and friends.
pub mod agent;
/// [BuildSpec][build::BuildSpec] and [BuildArtifact][build::BuildArtifact].
pub mod build;
/// [Command][command::Command] and the per-kind payloads.
pub mod command;
/// Deployment log / status relay types.
pub mod deployment;
/// Subtypes of [LogConfig][logger::LogConfig].
pub mod logger;

/// The captured result of one external process invocation.
#[typeshare]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShellOutput {
  pub success: bool,
  pub stdout: String,
  pub stderr: String,
  /// Present when the process failed to launch, exited nonzero,
  /// or was killed on deadline.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl ShellOutput {
  pub fn error(message: impl Into<String>) -> ShellOutput {
    ShellOutput {
      success: false,
      error: Some(message.into()),
      ..Default::default()
    }
  }

  /// stdout and stderr merged for inclusion in result logs.
  pub fn combined(&self) -> String {
    match (self.stdout.is_empty(), self.stderr.is_empty()) {
      (true, true) => String::new(),
      (false, true) => self.stdout.clone(),
      (true, false) => self.stderr.clone(),
      (false, false) => {
        format!("{}\n{}", self.stdout, self.stderr)
      }
    }
  }

  /// A short failure description for error fields.
  pub fn error_message(&self) -> String {
    if let Some(error) = &self.error {
      return error.clone();
    }
    if !self.stderr.is_empty() {
      return self.stderr.clone();
    }
    String::from("command failed")
  }
}

pub fn all_outputs_success(outputs: &[ShellOutput]) -> bool {
  outputs.iter().all(|output| output.success)
}

/// Validates names which end up inside kubectl invocations
/// (namespaces, app names, database names). Must be DNS-1123
/// compatible: lowercase alphanumeric edges, `-` and `.` inside.
pub fn valid_resource_name(name: &str) -> bool {
  let bytes = name.as_bytes();
  let Some((&first, rest)) = bytes.split_first() else {
    return false;
  };
  if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
    return false;
  }
  let Some((&last, middle)) = rest.split_last() else {
    return true;
  };
  if !last.is_ascii_lowercase() && !last.is_ascii_digit() {
    return false;
  }
  middle.iter().all(|&b| {
    b.is_ascii_lowercase()
      || b.is_ascii_digit()
      || b == b'-'
      || b == b'.'
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resource_name_validation() {
    assert!(valid_resource_name("hello"));
    assert!(valid_resource_name("my-app.v2"));
    assert!(valid_resource_name("a"));
    assert!(valid_resource_name("0db"));
    assert!(!valid_resource_name(""));
    assert!(!valid_resource_name("-app"));
    assert!(!valid_resource_name("app-"));
    assert!(!valid_resource_name("App"));
    assert!(!valid_resource_name("app name"));
    assert!(!valid_resource_name("app;rm -rf /"));
  }

  #[test]
  fn shell_output_combined() {
    let output = ShellOutput {
      success: true,
      stdout: String::from("out"),
      stderr: String::from("err"),
      error: None,
    };
    assert_eq!(output.combined(), "out\nerr");
  }
}
