//! The DEPLOY handler: build pipeline, then rollout, with the
//! status stream (`building` → `deploying` → `ready`/`failed`)
//! relayed to the control plane along the way.

use deploypilot_client::entities::{
  build::BuildSpec,
  command::{CommandResult, DeployPayload},
  deployment::{
    DeploymentLogLevel, DeploymentStatus, DeploymentStep,
  },
};

use super::parse_payload;
use crate::{relay::BuildRelaySink, state::log_relay};

pub async fn deploy(
  payload: &serde_json::Value,
) -> anyhow::Result<CommandResult> {
  let payload: DeployPayload = parse_payload(payload)?;
  let deployment_id = payload.deployment_id.clone();
  let relay = log_relay();

  relay.update_status(
    &deployment_id,
    DeploymentStatus::Building,
    None,
  );
  relay.send_log(
    &deployment_id,
    &format!("Starting deployment of {}", payload.app_name),
    DeploymentLogLevel::Info,
    DeploymentStep::Build,
  );

  let spec = build_spec(&payload);
  let sink = BuildRelaySink {
    deployment_id: deployment_id.clone(),
  };
  let artifact = builder::build(&spec, &sink).await;
  if !artifact.success {
    let error = artifact
      .error
      .clone()
      .unwrap_or_else(|| String::from("build failed"));
    relay.update_status(
      &deployment_id,
      DeploymentStatus::Failed,
      Some(error.clone()),
    );
    return Ok(CommandResult::failed(error, Some(artifact.logs)));
  }

  relay.update_status(
    &deployment_id,
    DeploymentStatus::Deploying,
    None,
  );
  relay.send_log(
    &deployment_id,
    &format!("Deploying image {}", artifact.image_name),
    DeploymentLogLevel::Info,
    DeploymentStep::Deploy,
  );

  let mut logs = artifact.logs.clone();
  let namespace = kube::namespace_for_user(&payload.user_id);

  let ensured =
    kube::ensure_namespace(&payload.user_id, None).await;
  if !ensured.success {
    return Ok(fail_deploy(
      &deployment_id,
      format!(
        "failed to ensure namespace {namespace}: {}",
        ensured.error_message()
      ),
      logs,
    ));
  }

  let deployed = kube::deploy_app(
    &namespace,
    &payload.app_name,
    &artifact.image_name,
    Some(artifact.exposed_port),
    payload.custom_domain.as_deref(),
  )
  .await;
  push_logs(&mut logs, &deployed.combined());
  if !deployed.success {
    return Ok(fail_deploy(
      &deployment_id,
      format!("deploy failed: {}", deployed.error_message()),
      logs,
    ));
  }

  // Runtime env vars live on the Deployment, not in the image.
  if !payload.env_vars.is_empty() {
    let env_set = kube::set_env_vars(
      &namespace,
      &payload.app_name,
      &payload.env_vars,
    )
    .await;
    push_logs(&mut logs, &env_set.combined());
    if !env_set.success {
      return Ok(fail_deploy(
        &deployment_id,
        format!(
          "failed to set environment: {}",
          env_set.error_message()
        ),
        logs,
      ));
    }
  }

  relay.update_status(
    &deployment_id,
    DeploymentStatus::Ready,
    None,
  );
  relay.send_log(
    &deployment_id,
    &format!(
      "Deployment ready: {} on port {}",
      artifact.image_name, artifact.exposed_port
    ),
    DeploymentLogLevel::Info,
    DeploymentStep::Deploy,
  );
  Ok(CommandResult::ok(Some(logs)))
}

fn build_spec(payload: &DeployPayload) -> BuildSpec {
  BuildSpec {
    app_name: payload.app_name.clone(),
    deployment_id: payload.deployment_id.clone(),
    git_repo_url: payload.git_repo_url.clone(),
    git_branch: payload.git_branch.clone(),
    git_token: payload.git_token.clone(),
    framework: payload.framework,
    build_command: payload.build_command.clone(),
    start_command: payload.start_command.clone(),
    output_directory: payload.output_directory.clone(),
    port: payload.port,
    env_vars: payload.env_vars.clone(),
    nuxt_major_version: None,
  }
}

fn fail_deploy(
  deployment_id: &str,
  error: String,
  logs: String,
) -> CommandResult {
  log_relay().update_status(
    deployment_id,
    DeploymentStatus::Failed,
    Some(error.clone()),
  );
  CommandResult::failed(error, Some(logs))
}

fn push_logs(logs: &mut String, addition: &str) {
  if addition.is_empty() {
    return;
  }
  if !logs.is_empty() && !logs.ends_with('\n') {
    logs.push('\n');
  }
  logs.push_str(addition);
  logs.push('\n');
}
