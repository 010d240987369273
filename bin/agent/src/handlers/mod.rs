//! One handler per command kind. Handlers never bubble errors:
//! anything thrown is converted into a failed [CommandResult]
//! here, at the dispatch boundary.

use anyhow::{Context, anyhow};
use deploypilot_client::entities::{
  ShellOutput,
  command::{Command, CommandKind, CommandResult},
};
use serde::de::DeserializeOwned;

mod app;
mod backup;
mod database;
mod deploy;
mod domain;

pub async fn run(command: &Command) -> CommandResult {
  let outcome = match command.kind {
    CommandKind::Deploy => deploy::deploy(&command.payload).await,
    CommandKind::Stop => app::stop(&command.payload).await,
    CommandKind::Restart => app::restart(&command.payload).await,
    CommandKind::Delete => app::delete(&command.payload).await,
    CommandKind::CreateNamespace => {
      app::create_namespace(&command.payload).await
    }
    CommandKind::UpdateEnv => {
      app::update_env(&command.payload).await
    }
    CommandKind::AddCustomDomain => {
      domain::add(&command.payload).await
    }
    CommandKind::RemoveCustomDomain => {
      domain::remove(&command.payload).await
    }
    CommandKind::CreateDatabase => {
      database::create(&command.payload).await
    }
    CommandKind::DeleteDatabase => {
      database::delete(&command.payload).await
    }
    CommandKind::UpdateDatabasePassword => {
      database::update_password(&command.payload).await
    }
    CommandKind::EnableDatabaseExternalAccess => {
      database::enable_external_access(&command.payload).await
    }
    CommandKind::DisableDatabaseExternalAccess => {
      database::disable_external_access(&command.payload).await
    }
    CommandKind::CreateBackup => {
      backup::create(&command.payload).await
    }
    CommandKind::RestoreBackup => {
      backup::restore(&command.payload).await
    }
    CommandKind::Unknown => {
      Err(anyhow!("unknown command kind"))
    }
  };
  match outcome {
    Ok(result) => result,
    Err(e) => CommandResult::failed(format!("{e:#}"), None),
  }
}

fn parse_payload<T: DeserializeOwned>(
  payload: &serde_json::Value,
) -> anyhow::Result<T> {
  serde_json::from_value(payload.clone())
    .context("invalid command payload")
}

/// Folds a shell outcome into the command result shape.
fn result_from(output: ShellOutput) -> CommandResult {
  let logs = output.combined();
  let logs = (!logs.is_empty()).then_some(logs);
  if output.success {
    CommandResult::ok(logs)
  } else {
    CommandResult::failed(output.error_message(), logs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn unknown_kind_yields_failed_result() {
    let command = Command {
      id: String::from("c1"),
      kind: CommandKind::Unknown,
      payload: serde_json::Value::Null,
      status: Default::default(),
      created_at: None,
    };
    let result = run(&command).await;
    assert!(!result.success);
    assert!(
      result.error.unwrap().contains("unknown command kind")
    );
  }

  #[tokio::test]
  async fn invalid_payload_yields_failed_result() {
    let command = Command {
      id: String::from("c2"),
      kind: CommandKind::Stop,
      payload: serde_json::json!({"unexpected": true}),
      status: Default::default(),
      created_at: None,
    };
    let result = run(&command).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("invalid command payload"));
  }

  #[test]
  fn failed_results_always_carry_an_error() {
    let result = result_from(ShellOutput {
      success: false,
      stdout: String::new(),
      stderr: String::from("went wrong"),
      error: None,
    });
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("went wrong"));
  }
}
