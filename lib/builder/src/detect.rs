//! Probes a cloned tree: package manager, dev/start port, nuxt
//! major version, and reclassification of misdeclared static
//! sites.

use std::{collections::HashMap, path::Path, sync::OnceLock};

use deploypilot_client::entities::build::{
  BuildSpec, Framework, PackageManager,
};
use regex::Regex;
use serde::Deserialize;

/// Searched in order when a static site does not declare its
/// output directory.
pub const OUTPUT_DIR_CANDIDATES: [&str; 6] =
  ["dist", "build", "public", "out", "_site", "www"];

const DEFAULT_OUTPUT_DIR: &str = "dist";

#[derive(Debug, Clone)]
pub struct Detection {
  pub package_manager: PackageManager,
  pub lockfile: bool,
  /// Framework after static-site reclassification.
  pub framework: Framework,
  pub output_directory: String,
  /// Port scraped from the start/dev scripts, if any.
  pub port: Option<u16>,
  pub nuxt_major: u32,
  /// Effective start command (payload wins over package.json).
  pub start_command: Option<String>,
  pub has_build_script: bool,
  pub has_dockerfile: bool,
}

#[derive(Debug, Default, Deserialize)]
struct PackageJson {
  #[serde(default)]
  scripts: HashMap<String, String>,
  #[serde(default)]
  dependencies: HashMap<String, String>,
  #[serde(default, rename = "devDependencies")]
  dev_dependencies: HashMap<String, String>,
}

pub fn detect(dir: &Path, spec: &BuildSpec) -> Detection {
  let (package_manager, lockfile) = detect_package_manager(dir);
  let package: PackageJson =
    std::fs::read_to_string(dir.join("package.json"))
      .ok()
      .and_then(|raw| serde_json::from_str(&raw).ok())
      .unwrap_or_default();

  let port = package
    .scripts
    .get("start")
    .or_else(|| package.scripts.get("dev"))
    .and_then(|script| parse_port(script));

  let nuxt_major = spec.nuxt_major_version.unwrap_or_else(|| {
    package
      .dependencies
      .get("nuxt")
      .or_else(|| package.dev_dependencies.get("nuxt"))
      .map(|range| nuxt_major_version(range))
      .unwrap_or(3)
  });

  let start_command = spec
    .start_command
    .clone()
    .or_else(|| package.scripts.get("start").cloned());

  let has_build_script = package.scripts.contains_key("build");

  let framework = if should_demote_to_static(
    spec.framework,
    has_build_script,
    start_command.as_deref(),
  ) {
    Framework::Static
  } else {
    spec.framework
  };

  let output_directory = spec
    .output_directory
    .clone()
    .filter(|declared| !declared.is_empty())
    .unwrap_or_else(|| {
      OUTPUT_DIR_CANDIDATES
        .iter()
        .find(|candidate| dir.join(candidate).is_dir())
        .map(|candidate| candidate.to_string())
        .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string())
    });

  Detection {
    package_manager,
    lockfile,
    framework,
    output_directory,
    port,
    nuxt_major,
    start_command,
    has_build_script,
    has_dockerfile: dir.join("Dockerfile").is_file(),
  }
}

/// Lockfiles are probed in priority order; npm is the fallback
/// manager with or without its lockfile.
fn detect_package_manager(dir: &Path) -> (PackageManager, bool) {
  if dir.join("pnpm-lock.yaml").is_file() {
    (PackageManager::Pnpm, true)
  } else if dir.join("yarn.lock").is_file() {
    (PackageManager::Yarn, true)
  } else {
    (
      PackageManager::Npm,
      dir.join("package-lock.json").is_file(),
    )
  }
}

/// `PORT=<n>`, `--port[= ]<n>`, `-p[= ]<n>`. First matching
/// pattern wins.
pub fn parse_port(script: &str) -> Option<u16> {
  static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
  let patterns = PATTERNS.get_or_init(|| {
    [
      r"PORT=(\d+)",
      r"--port[= ](\d+)",
      r"(?:^|\s)-p[= ](\d+)",
    ]
    .iter()
    .map(|pattern| {
      Regex::new(pattern).expect("invalid port pattern")
    })
    .collect()
  });
  patterns.iter().find_map(|pattern| {
    pattern
      .captures(script)
      .and_then(|captures| captures.get(1))
      .and_then(|digits| digits.as_str().parse().ok())
  })
}

/// First digit of the declared version range; `latest` and other
/// digit-free ranges default to 3.
pub fn nuxt_major_version(range: &str) -> u32 {
  range
    .chars()
    .find(|c| c.is_ascii_digit())
    .and_then(|c| c.to_digit(10))
    .unwrap_or(3)
}

/// A `nodejs`/`static` app with a build script but no real server
/// start is a static site: build it and serve the output.
fn should_demote_to_static(
  framework: Framework,
  has_build_script: bool,
  start_command: Option<&str>,
) -> bool {
  if !matches!(framework, Framework::Nodejs | Framework::Static) {
    return false;
  }
  if !has_build_script {
    return false;
  }
  let Some(start) = start_command else {
    return true;
  };
  let start = start.trim();
  if matches!(
    start,
    "npm run build" | "yarn run build" | "pnpm run build"
  ) {
    return true;
  }
  start.split_whitespace().any(|token| {
    matches!(token, "serve" | "live-server" | "http-server")
  })
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;

  fn spec(framework: Framework) -> BuildSpec {
    BuildSpec {
      app_name: String::from("hello"),
      deployment_id: String::from("d1"),
      git_repo_url: String::from(
        "https://github.com/acme/hello.git",
      ),
      git_branch: String::from("main"),
      git_token: None,
      framework,
      build_command: None,
      start_command: None,
      output_directory: None,
      port: 3000,
      env_vars: HashMap::new(),
      nuxt_major_version: None,
    }
  }

  fn write(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
  }

  #[test]
  fn port_patterns() {
    assert_eq!(parse_port("PORT=5006 node server.js"), Some(5006));
    assert_eq!(parse_port("vite --port=5006"), Some(5006));
    assert_eq!(parse_port("vite --port 5006"), Some(5006));
    assert_eq!(parse_port("serve -p 5006"), Some(5006));
    assert_eq!(parse_port("serve -p=5006"), Some(5006));
    assert_eq!(parse_port("node server.js"), None);
    assert_eq!(parse_port("node app.js --portal 9"), None);
  }

  #[test]
  fn first_pattern_wins() {
    assert_eq!(
      parse_port("PORT=4000 serve -p 5000"),
      Some(4000)
    );
  }

  #[test]
  fn nuxt_version_ranges() {
    assert_eq!(nuxt_major_version("^2.15.0"), 2);
    assert_eq!(nuxt_major_version("~3.4.1"), 3);
    assert_eq!(nuxt_major_version("latest"), 3);
  }

  #[test]
  fn lockfile_priority() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "package.json", "{}");
    write(dir.path(), "yarn.lock", "");
    write(dir.path(), "pnpm-lock.yaml", "");
    let detection = detect(dir.path(), &spec(Framework::Nodejs));
    assert_eq!(detection.package_manager, PackageManager::Pnpm);
    assert!(detection.lockfile);
  }

  #[test]
  fn npm_without_lockfile() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "package.json", "{}");
    let detection = detect(dir.path(), &spec(Framework::Nextjs));
    assert_eq!(detection.package_manager, PackageManager::Npm);
    assert!(!detection.lockfile);
  }

  #[test]
  fn demotes_build_only_nodejs_to_static() {
    let dir = tempfile::tempdir().unwrap();
    write(
      dir.path(),
      "package.json",
      r#"{"scripts": {"build": "vite build"}}"#,
    );
    std::fs::create_dir(dir.path().join("build")).unwrap();
    let detection = detect(dir.path(), &spec(Framework::Nodejs));
    assert_eq!(detection.framework, Framework::Static);
    assert_eq!(detection.output_directory, "build");
  }

  #[test]
  fn demotes_static_server_start_scripts() {
    let dir = tempfile::tempdir().unwrap();
    write(
      dir.path(),
      "package.json",
      r#"{"scripts": {"build": "webpack", "start": "serve -s dist"}}"#,
    );
    let detection = detect(dir.path(), &spec(Framework::Nodejs));
    assert_eq!(detection.framework, Framework::Static);
    assert_eq!(detection.output_directory, "dist");
  }

  #[test]
  fn keeps_real_node_servers() {
    let dir = tempfile::tempdir().unwrap();
    write(
      dir.path(),
      "package.json",
      r#"{"scripts": {"build": "tsc", "start": "node dist/server.js"}}"#,
    );
    let detection = detect(dir.path(), &spec(Framework::Nodejs));
    assert_eq!(detection.framework, Framework::Nodejs);
    assert_eq!(
      detection.start_command.as_deref(),
      Some("node dist/server.js")
    );
  }

  #[test]
  fn nuxt_major_from_dependencies() {
    let dir = tempfile::tempdir().unwrap();
    write(
      dir.path(),
      "package.json",
      r#"{"dependencies": {"nuxt": "^2.15.0"}}"#,
    );
    let detection = detect(dir.path(), &spec(Framework::Nuxt));
    assert_eq!(detection.nuxt_major, 2);
  }

  #[test]
  fn output_dir_candidates_are_ordered() {
    let dir = tempfile::tempdir().unwrap();
    write(
      dir.path(),
      "package.json",
      r#"{"scripts": {"build": "x"}}"#,
    );
    std::fs::create_dir(dir.path().join("out")).unwrap();
    std::fs::create_dir(dir.path().join("www")).unwrap();
    let detection = detect(dir.path(), &spec(Framework::Static));
    assert_eq!(detection.output_directory, "out");
  }

  #[test]
  fn explicit_output_dir_wins() {
    let dir = tempfile::tempdir().unwrap();
    write(
      dir.path(),
      "package.json",
      r#"{"scripts": {"build": "x"}}"#,
    );
    let mut spec = spec(Framework::Static);
    spec.output_directory = Some(String::from("site"));
    let detection = detect(dir.path(), &spec);
    assert_eq!(detection.output_directory, "site");
  }
}
