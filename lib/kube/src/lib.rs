//! Thin verbs over `kubectl` and the site helper scripts.
//!
//! Every verb validates interpolated names before any shell
//! invocation and returns a [ShellOutput]. Deletes are tolerant of
//! absent objects; apply is declarative and idempotent by the
//! cluster's own guarantees.

use std::{collections::HashMap, time::Duration};

use deploypilot_client::entities::{
  ShellOutput, agent::RunningPod, valid_resource_name,
};
use shell::quote;

/// Deadline on one-shot kubectl / helper script invocations.
const KUBECTL_TIMEOUT: Duration = Duration::from_secs(60);
/// Readiness wait on freshly created StatefulSets.
const READY_TIMEOUT: Duration = Duration::from_secs(120);
const READY_POLL_PERIOD: Duration = Duration::from_secs(5);

/// Namespaces are derived from the owning user id.
pub fn namespace_for_user(user_id: &str) -> String {
  format!("dp-{user_id}")
}

fn invalid_name(value: &str) -> ShellOutput {
  ShellOutput::error(format!(
    "invalid kubernetes name: {value:?}"
  ))
}

/// Creates the user namespace via the site helper script.
pub async fn ensure_namespace(
  user_id: &str,
  registry_token: Option<&str>,
) -> ShellOutput {
  let namespace = namespace_for_user(user_id);
  if !valid_resource_name(&namespace) {
    return invalid_name(&namespace);
  }
  let mut command =
    format!("deploypilot-create-namespace {}", quote(user_id));
  if let Some(token) = registry_token {
    command.push(' ');
    command.push_str(&quote(token));
  }
  shell::run(&command, KUBECTL_TIMEOUT).await
}

/// Deploys (or redeploys) an app via the site helper script.
pub async fn deploy_app(
  namespace: &str,
  app_name: &str,
  image: &str,
  port: Option<u16>,
  domain: Option<&str>,
) -> ShellOutput {
  for name in [namespace, app_name] {
    if !valid_resource_name(name) {
      return invalid_name(name);
    }
  }
  if let Some(domain) = domain
    && !valid_resource_name(domain)
  {
    return invalid_name(domain);
  }
  let mut command = format!(
    "deploypilot-deploy-app {} {} {}",
    quote(namespace),
    quote(app_name),
    quote(image),
  );
  if let Some(port) = port {
    command.push_str(&format!(" {port}"));
  }
  if let Some(domain) = domain {
    command.push(' ');
    command.push_str(&quote(domain));
  }
  shell::run(&command, KUBECTL_TIMEOUT).await
}

pub async fn delete_app(
  namespace: &str,
  app_name: &str,
) -> ShellOutput {
  for name in [namespace, app_name] {
    if !valid_resource_name(name) {
      return invalid_name(name);
    }
  }
  let command = format!(
    "deploypilot-delete-app {} {}",
    quote(namespace),
    quote(app_name),
  );
  shell::run(&command, KUBECTL_TIMEOUT).await
}

pub async fn restart(
  namespace: &str,
  app_name: &str,
) -> ShellOutput {
  rollout_restart(namespace, "deployment", app_name).await
}

pub async fn rollout_restart(
  namespace: &str,
  kind: &str,
  name: &str,
) -> ShellOutput {
  for value in [namespace, name] {
    if !valid_resource_name(value) {
      return invalid_name(value);
    }
  }
  let command = format!(
    "kubectl rollout restart {kind}/{} -n {}",
    quote(name),
    quote(namespace),
  );
  shell::run(&command, KUBECTL_TIMEOUT).await
}

/// Stop scales to zero; the objects stay in place.
pub async fn stop(
  namespace: &str,
  app_name: &str,
) -> ShellOutput {
  scale(namespace, app_name, 0).await
}

async fn scale(
  namespace: &str,
  app_name: &str,
  replicas: u32,
) -> ShellOutput {
  for name in [namespace, app_name] {
    if !valid_resource_name(name) {
      return invalid_name(name);
    }
  }
  let command = format!(
    "kubectl scale deployment/{} -n {} --replicas={replicas}",
    quote(app_name),
    quote(namespace),
  );
  shell::run(&command, KUBECTL_TIMEOUT).await
}

/// Builds the `kubectl set env` invocation. None when there is
/// nothing to set. Keys are sorted so the command is stable.
pub fn set_env_command(
  namespace: &str,
  app_name: &str,
  env_vars: &HashMap<String, String>,
) -> Option<String> {
  if env_vars.is_empty() {
    return None;
  }
  let mut pairs: Vec<_> = env_vars.iter().collect();
  pairs.sort_by(|a, b| a.0.cmp(b.0));
  let args = pairs
    .into_iter()
    .map(|(key, value)| quote(&format!("{key}={value}")))
    .collect::<Vec<_>>()
    .join(" ");
  Some(format!(
    "kubectl set env deployment/{} -n {} {args}",
    quote(app_name),
    quote(namespace),
  ))
}

/// Empty mapping is a no-op success without touching the cluster.
pub async fn set_env_vars(
  namespace: &str,
  app_name: &str,
  env_vars: &HashMap<String, String>,
) -> ShellOutput {
  for name in [namespace, app_name] {
    if !valid_resource_name(name) {
      return invalid_name(name);
    }
  }
  let Some(command) =
    set_env_command(namespace, app_name, env_vars)
  else {
    return ShellOutput {
      success: true,
      ..Default::default()
    };
  };
  shell::run(&command, KUBECTL_TIMEOUT).await
}

/// Removes the Deployment and its companion Service and Ingress.
/// Each sub-step is not-found tolerant; the composite fails only
/// if a sub-step actually failed.
pub async fn delete_deployment(
  namespace: &str,
  app_name: &str,
) -> ShellOutput {
  for name in [namespace, app_name] {
    if !valid_resource_name(name) {
      return invalid_name(name);
    }
  }
  let mut combined = ShellOutput {
    success: true,
    ..Default::default()
  };
  for kind in ["deployment", "service", "ingress"] {
    let output =
      delete_resource(namespace, kind, app_name).await;
    if !output.stdout.is_empty() {
      if !combined.stdout.is_empty() {
        combined.stdout.push('\n');
      }
      combined.stdout.push_str(&output.stdout);
    }
    if !output.stderr.is_empty() {
      if !combined.stderr.is_empty() {
        combined.stderr.push('\n');
      }
      combined.stderr.push_str(&output.stderr);
    }
    if !output.success {
      combined.success = false;
      combined.error = Some(format!(
        "failed deleting {kind}/{app_name}: {}",
        output.error_message()
      ));
    }
  }
  combined
}

pub async fn delete_resource(
  namespace: &str,
  kind: &str,
  name: &str,
) -> ShellOutput {
  for value in [namespace, name] {
    if !valid_resource_name(value) {
      return invalid_name(value);
    }
  }
  let command = format!(
    "kubectl delete {kind} {} -n {} --ignore-not-found",
    quote(name),
    quote(namespace),
  );
  shell::run(&command, KUBECTL_TIMEOUT).await
}

/// Applies a rendered manifest over stdin.
pub async fn apply_manifest(manifest: &str) -> ShellOutput {
  let command = format!(
    "printf '%s' {} | kubectl apply -f -",
    quote(manifest)
  );
  shell::run(&command, KUBECTL_TIMEOUT).await
}

/// Patches an opaque secret's stringData in place.
pub async fn patch_secret(
  namespace: &str,
  secret_name: &str,
  entries: &[(&str, &str)],
) -> ShellOutput {
  for value in [namespace, secret_name] {
    if !valid_resource_name(value) {
      return invalid_name(value);
    }
  }
  let data = entries
    .iter()
    .map(|(key, value)| {
      format!(
        "\"{}\":\"{}\"",
        key.replace('"', "\\\""),
        value.replace('\\', "\\\\").replace('"', "\\\"")
      )
    })
    .collect::<Vec<_>>()
    .join(",");
  let patch = format!("{{\"stringData\":{{{data}}}}}");
  let command = format!(
    "kubectl patch secret {} -n {} -p {}",
    quote(secret_name),
    quote(namespace),
    quote(&patch),
  );
  shell::run(&command, KUBECTL_TIMEOUT).await
}

/// Runs a command inside the database pod (`<name>-0`).
pub async fn exec_in_pod(
  namespace: &str,
  pod: &str,
  command: &str,
  timeout: Duration,
) -> ShellOutput {
  for value in [namespace, pod] {
    if !valid_resource_name(value) {
      return invalid_name(value);
    }
  }
  let full = format!(
    "kubectl exec -n {} {} -- sh -c {}",
    quote(namespace),
    quote(pod),
    quote(command),
  );
  shell::run(&full, timeout).await
}

/// Generic passthrough for callers composing their own pipelines.
pub async fn execute(
  command: &str,
  timeout: Duration,
) -> ShellOutput {
  shell::run(command, timeout).await
}

/// Polls `readyReplicas` until the StatefulSet reports ready or
/// the two minute deadline lapses.
pub async fn wait_statefulset_ready(
  namespace: &str,
  name: &str,
) -> ShellOutput {
  for value in [namespace, name] {
    if !valid_resource_name(value) {
      return invalid_name(value);
    }
  }
  let command = format!(
    "kubectl get statefulset {} -n {} -o jsonpath='{{.status.readyReplicas}}'",
    quote(name),
    quote(namespace),
  );
  let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
  loop {
    let output = shell::run(&command, KUBECTL_TIMEOUT).await;
    if output.success && output.stdout.trim() == "1" {
      return ShellOutput {
        success: true,
        stdout: format!("statefulset {name} is ready"),
        ..Default::default()
      };
    }
    if tokio::time::Instant::now() >= deadline {
      return ShellOutput::error(format!(
        "statefulset {name} did not become ready within {}s",
        READY_TIMEOUT.as_secs()
      ));
    }
    tokio::time::sleep(READY_POLL_PERIOD).await;
  }
}

/// All pods in deploypilot namespaces, for the heartbeat snapshot.
pub async fn list_running_pods() -> Vec<RunningPod> {
  let command = "kubectl get pods --all-namespaces --no-headers -o custom-columns=NS:.metadata.namespace,NAME:.metadata.name,PHASE:.status.phase";
  let output = shell::run(command, KUBECTL_TIMEOUT).await;
  if !output.success {
    tracing::debug!(
      "failed to list pods | {}",
      output.error_message()
    );
    return Vec::new();
  }
  parse_pod_lines(&output.stdout)
}

/// Parses `kubectl get pods` custom-column output, keeping only
/// pods in `dp-` prefixed namespaces.
pub fn parse_pod_lines(stdout: &str) -> Vec<RunningPod> {
  stdout
    .lines()
    .filter_map(|line| {
      let mut parts = line.split_whitespace();
      let namespace = parts.next()?;
      let name = parts.next()?;
      let phase = parts.next()?;
      namespace.starts_with("dp-").then(|| RunningPod {
        namespace: namespace.to_string(),
        name: name.to_string(),
        phase: phase.to_string(),
      })
    })
    .collect()
}

/// Recent logs for an app, for the local log-query endpoint.
pub async fn pod_logs(
  namespace: &str,
  app_name: &str,
  lines: u32,
) -> ShellOutput {
  for value in [namespace, app_name] {
    if !valid_resource_name(value) {
      return invalid_name(value);
    }
  }
  let command = format!(
    "kubectl logs deployment/{} -n {} --tail={lines}",
    quote(app_name),
    quote(namespace),
  );
  shell::run(&command, KUBECTL_TIMEOUT).await
}

/// Argv for a follow stream, consumed by the local log-stream
/// endpoint via [shell::spawn_streaming].
pub fn follow_logs_args(
  namespace: &str,
  app_name: &str,
) -> anyhow::Result<Vec<String>> {
  for value in [namespace, app_name] {
    if !valid_resource_name(value) {
      anyhow::bail!("invalid kubernetes name: {value:?}");
    }
  }
  Ok(vec![
    String::from("logs"),
    String::from("-f"),
    format!("deployment/{app_name}"),
    String::from("-n"),
    namespace.to_string(),
    String::from("--tail=100"),
  ])
}

/// Server version string for registration.
pub async fn kube_version() -> String {
  let output = shell::run(
    "kubectl version 2>/dev/null | tail -n 1",
    KUBECTL_TIMEOUT,
  )
  .await;
  let version = output.stdout.trim();
  if output.success && !version.is_empty() {
    version.to_string()
  } else {
    String::from("unknown")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn set_env_command_is_sorted_and_quoted() {
    let mut vars = HashMap::new();
    vars.insert(String::from("B"), String::from("two"));
    vars.insert(String::from("A"), String::from("o'ne"));
    let command =
      set_env_command("dp-u1", "hello", &vars).unwrap();
    assert_eq!(
      command,
      r#"kubectl set env deployment/'hello' -n 'dp-u1' 'A=o'\''ne' 'B=two'"#
    );
  }

  #[test]
  fn set_env_command_empty_is_none() {
    assert!(
      set_env_command("dp-u1", "hello", &HashMap::new()).is_none()
    );
  }

  #[tokio::test]
  async fn set_env_vars_empty_map_is_noop_success() {
    let output =
      set_env_vars("dp-u1", "hello", &HashMap::new()).await;
    assert!(output.success);
    assert!(output.stdout.is_empty());
  }

  #[tokio::test]
  async fn invalid_names_fail_before_any_invocation() {
    let output = delete_app("dp-u1", "Hello World").await;
    assert!(!output.success);
    assert!(output.error.unwrap().contains("invalid"));
  }

  #[test]
  fn pod_line_parsing_filters_platform_namespaces() {
    let stdout = "\
dp-u1     hello-5dd87c     Running
kube-system  coredns-abc   Running
dp-u2     api-1            Pending";
    let pods = parse_pod_lines(stdout);
    assert_eq!(pods.len(), 2);
    assert_eq!(pods[0].namespace, "dp-u1");
    assert_eq!(pods[0].name, "hello-5dd87c");
    assert_eq!(pods[1].phase, "Pending");
  }

  #[test]
  fn follow_args_reject_bad_names() {
    assert!(follow_logs_args("dp-u1", "ok-app").is_ok());
    assert!(follow_logs_args("dp-u1", "bad app").is_err());
  }

  #[test]
  fn namespace_derivation() {
    assert_eq!(namespace_for_user("u1"), "dp-u1");
  }
}
