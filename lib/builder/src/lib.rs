//! The build pipeline: clone, detect, synthesize a recipe, build
//! the image, import it into the cluster runtime, resolve the
//! exposed port. Each step compensates on failure and the
//! per-deployment workspace is removed on every exit path.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use deploypilot_client::entities::{
  build::{BuildArtifact, BuildSpec, Framework},
  deployment::DeploymentLogLevel,
  valid_resource_name,
};
use shell::quote;

mod clone;
mod detect;
mod dockerfile;

pub use clone::{authenticated_url, clone_repo, mask_tokens};
pub use detect::{
  Detection, OUTPUT_DIR_CANDIDATES, detect, nuxt_major_version,
  parse_port,
};
pub use dockerfile::{Recipe, synthesize};

/// Per-deployment workspaces live under here, keyed by app name.
pub const BUILD_ROOT: &str = "/tmp/deploypilot-builds";

const BUILD_TIMEOUT: Duration = Duration::from_secs(600);
const IMPORT_TIMEOUT: Duration = Duration::from_secs(300);

/// Lines of build output included in the terminal error digest.
const ERROR_DIGEST_LINES: usize = 20;

/// Receives masked pipeline output as it is produced. The deploy
/// handler points this at the control plane log relay.
pub trait BuildLogSink: Send + Sync {
  fn line(&self, level: DeploymentLogLevel, message: &str);
}

pub async fn build(
  spec: &BuildSpec,
  sink: &dyn BuildLogSink,
) -> BuildArtifact {
  let workspace = PathBuf::from(BUILD_ROOT).join(&spec.app_name);
  let artifact = run_pipeline(spec, &workspace, sink).await;
  // Cleanup is unconditional; failures here are logged and
  // swallowed.
  if let Err(e) = tokio::fs::remove_dir_all(&workspace).await
    && e.kind() != std::io::ErrorKind::NotFound
  {
    tracing::debug!(
      "failed to remove build workspace {workspace:?} | {e}"
    );
  }
  artifact
}

struct Pipeline<'a> {
  spec: &'a BuildSpec,
  sink: &'a dyn BuildLogSink,
  logs: String,
}

impl Pipeline<'_> {
  fn mask(&self, text: &str) -> String {
    let masked = mask_tokens(text);
    match self.spec.git_token.as_deref() {
      Some(token) if !token.is_empty() => {
        masked.replace(token, "***")
      }
      _ => masked,
    }
  }

  fn emit(&mut self, level: DeploymentLogLevel, message: &str) {
    let message = self.mask(message);
    self.logs.push_str(&message);
    self.logs.push('\n');
    self.sink.line(level, &message);
  }

  fn info(&mut self, message: &str) {
    self.emit(DeploymentLogLevel::Info, message);
  }

  fn warn(&mut self, message: &str) {
    self.emit(DeploymentLogLevel::Warning, message);
  }

  fn fail(mut self, error: &str) -> BuildArtifact {
    let error = self.mask(error);
    self.emit(DeploymentLogLevel::Error, &error);
    BuildArtifact {
      success: false,
      logs: self.logs,
      error: Some(error),
      ..Default::default()
    }
  }
}

async fn run_pipeline(
  spec: &BuildSpec,
  workspace: &Path,
  sink: &dyn BuildLogSink,
) -> BuildArtifact {
  let mut ctx = Pipeline {
    spec,
    sink,
    logs: String::new(),
  };

  for name in [&spec.app_name, &spec.deployment_id] {
    if !valid_resource_name(name) {
      return ctx.fail(&format!(
        "invalid app/deployment identifier: {name:?}"
      ));
    }
  }

  // 1. Fresh workspace.
  if let Err(e) = tokio::fs::create_dir_all(BUILD_ROOT).await {
    return ctx
      .fail(&format!("failed to create build root: {e}"));
  }
  if let Err(e) = tokio::fs::remove_dir_all(workspace).await
    && e.kind() != std::io::ErrorKind::NotFound
  {
    return ctx.fail(&format!(
      "failed to clear previous workspace: {e}"
    ));
  }

  // 2. Clone.
  ctx.info(&format!(
    "Cloning {} (branch {})",
    spec.git_repo_url, spec.git_branch
  ));
  let cloned = clone_repo(spec, workspace).await;
  if !cloned.stderr.is_empty() {
    // git reports progress on stderr; forward it either way.
    let stderr = cloned.stderr.clone();
    ctx.info(&stderr);
  }
  if !cloned.success {
    return ctx.fail(&format!(
      "git clone failed: {}",
      cloned.error_message()
    ));
  }

  // 3. Detect.
  let detection = detect(workspace, spec);
  ctx.info(&format!(
    "Detected framework {} with {} (lockfile: {})",
    detection.framework,
    detection.package_manager,
    detection.lockfile
  ));

  // 4. Recipe.
  if spec.framework == Framework::Docker
    && detection.has_dockerfile
  {
    ctx.info("Using Dockerfile from repository");
  } else {
    let recipe = synthesize(spec, &detection);
    for warning in &recipe.warnings {
      let warning = warning.clone();
      ctx.warn(&warning);
    }
    if let Err(e) = tokio::fs::write(
      workspace.join("Dockerfile"),
      &recipe.dockerfile,
    )
    .await
    {
      return ctx
        .fail(&format!("failed to write Dockerfile: {e}"));
    }
    ctx.info("Synthesized container recipe");
  }

  // 5. Build.
  let tag = format!("{}:{}", spec.app_name, spec.deployment_id);
  ctx.info(&format!("Building image {tag}"));
  let workspace_str = workspace.display().to_string();
  let mut build_lines: Vec<String> = Vec::new();
  let exit = {
    let spec_token = spec.git_token.clone();
    let sink = ctx.sink;
    let lines = &mut build_lines;
    shell::spawn_streaming(
      "docker",
      &["build", "-t", &tag, &workspace_str],
      BUILD_TIMEOUT,
      |line| {
        let mut masked = mask_tokens(&line);
        if let Some(token) = spec_token.as_deref()
          && !token.is_empty()
        {
          masked = masked.replace(token, "***");
        }
        sink.line(DeploymentLogLevel::Info, &masked);
        lines.push(masked);
      },
    )
    .await
  };
  for line in &build_lines {
    ctx.logs.push_str(line);
    ctx.logs.push('\n');
  }
  let exit = match exit {
    Ok(exit) => exit,
    Err(e) => {
      return ctx.fail(&format!("failed to run docker build: {e:#}"));
    }
  };
  if exit.timed_out {
    return ctx.fail(&format!(
      "docker build timed out after {}s",
      BUILD_TIMEOUT.as_secs()
    ));
  }
  if !exit.success {
    let digest =
      error_digest(&build_lines, ERROR_DIGEST_LINES);
    ctx.emit(DeploymentLogLevel::Error, &digest);
    return ctx.fail(&format!(
      "docker build failed with exit code {}",
      exit
        .code
        .map(|c| c.to_string())
        .unwrap_or_else(|| String::from("unknown"))
    ));
  }

  // 6. Import into the cluster runtime.
  ctx.info("Importing image into cluster runtime");
  let import = shell::run(
    &format!(
      "docker save {} | k3s ctr images import -",
      quote(&tag)
    ),
    IMPORT_TIMEOUT,
  )
  .await;
  if !import.success {
    return ctx.fail(&format!(
      "image import failed: {}",
      import.error_message()
    ));
  }

  // 7. Exposed port.
  let inspect = shell::run(
    &format!(
      "docker inspect --format '{{{{json .Config.ExposedPorts}}}}' {}",
      quote(&tag)
    ),
    Duration::from_secs(30),
  )
  .await;
  let exposed_port = if inspect.success {
    parse_exposed_port(&inspect.stdout).unwrap_or(spec.port)
  } else {
    spec.port
  };

  let image_name = format!("docker.io/library/{tag}");
  ctx.info(&format!(
    "Build complete: {image_name} (port {exposed_port})"
  ));
  BuildArtifact {
    success: true,
    image_name,
    exposed_port,
    logs: ctx.logs,
    error: None,
  }
}

/// First TCP port under the image's exposed ports, lowest wins.
pub fn parse_exposed_port(stdout: &str) -> Option<u16> {
  let value: serde_json::Value =
    serde_json::from_str(stdout.trim()).ok()?;
  let map = value.as_object()?;
  let mut ports: Vec<u16> = map
    .keys()
    .filter_map(|key| key.strip_suffix("/tcp")?.parse().ok())
    .collect();
  ports.sort_unstable();
  ports.first().copied()
}

/// Last `count` non-blank lines, for terminal error reporting.
pub fn error_digest(lines: &[String], count: usize) -> String {
  let non_blank: Vec<&str> = lines
    .iter()
    .map(|line| line.trim_end())
    .filter(|line| !line.trim().is_empty())
    .collect();
  let start = non_blank.len().saturating_sub(count);
  non_blank[start..].join("\n")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn exposed_port_prefers_lowest_tcp() {
    assert_eq!(
      parse_exposed_port(r#"{"8080/tcp":{},"3000/tcp":{}}"#),
      Some(3000)
    );
    assert_eq!(
      parse_exposed_port(r#"{"53/udp":{}}"#),
      None
    );
    assert_eq!(parse_exposed_port("null"), None);
    assert_eq!(parse_exposed_port("not json"), None);
  }

  #[test]
  fn digest_keeps_last_non_blank_lines() {
    let lines: Vec<String> = (1..=30)
      .map(|i| {
        if i % 3 == 0 {
          String::new()
        } else {
          format!("line {i}")
        }
      })
      .collect();
    let digest = error_digest(&lines, 20);
    assert_eq!(digest.lines().count(), 20);
    assert!(digest.ends_with("line 29"));
    assert!(!digest.contains("\n\n"));
  }
}
