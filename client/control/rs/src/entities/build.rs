use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use typeshare::typeshare;

/// Framework declared by the control plane for a deployment.
/// Detection may reclassify `nodejs`/`static` (see builder).
#[typeshare]
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  AsRefStr,
  EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Framework {
  Angular,
  React,
  ReactVite,
  Vue,
  VueVite,
  Svelte,
  SvelteVite,
  Vite,
  Nextjs,
  Nuxt,
  Nodejs,
  Nestjs,
  Docker,
  Static,
}

impl Framework {
  /// Frameworks whose build output is served by nginx.
  pub fn is_static(&self) -> bool {
    matches!(
      self,
      Framework::Angular
        | Framework::React
        | Framework::ReactVite
        | Framework::Vue
        | Framework::VueVite
        | Framework::Svelte
        | Framework::SvelteVite
        | Framework::Vite
        | Framework::Static
    )
  }

  /// Legacy webpack toolchains which need the OpenSSL 3
  /// compatibility flag on current Node images.
  pub fn needs_legacy_openssl(&self) -> bool {
    matches!(
      self,
      Framework::Angular | Framework::React | Framework::Vue
    )
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PackageManager {
  #[default]
  Npm,
  Yarn,
  Pnpm,
}

/// Typed input to the build pipeline, assembled by the deploy
/// handler from the command payload.
#[derive(Debug, Clone)]
pub struct BuildSpec {
  pub app_name: String,
  pub deployment_id: String,
  pub git_repo_url: String,
  pub git_branch: String,
  pub git_token: Option<String>,
  pub framework: Framework,
  pub build_command: Option<String>,
  pub start_command: Option<String>,
  pub output_directory: Option<String>,
  pub port: u16,
  pub env_vars: HashMap<String, String>,
  /// Derived during detection when framework is `nuxt`.
  pub nuxt_major_version: Option<u32>,
}

/// What the build pipeline hands back to the deploy handler.
#[derive(Debug, Clone, Default)]
pub struct BuildArtifact {
  pub success: bool,
  /// Fully qualified reference resolvable by the cluster runtime
  /// after import, eg `docker.io/library/hello:d1`.
  pub image_name: String,
  pub exposed_port: u16,
  /// Accumulated pipeline log buffer.
  pub logs: String,
  pub error: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn framework_wire_format() {
    assert_eq!(
      serde_json::to_string(&Framework::ReactVite).unwrap(),
      "\"react-vite\""
    );
    assert_eq!(
      serde_json::from_str::<Framework>("\"nextjs\"").unwrap(),
      Framework::Nextjs
    );
    assert_eq!(
      serde_json::from_str::<Framework>("\"svelte-vite\"").unwrap(),
      Framework::SvelteVite
    );
  }

  #[test]
  fn static_classification() {
    assert!(Framework::Angular.is_static());
    assert!(Framework::Vite.is_static());
    assert!(!Framework::Nextjs.is_static());
    assert!(!Framework::Nodejs.is_static());
    assert!(Framework::React.needs_legacy_openssl());
    assert!(!Framework::ReactVite.needs_legacy_openssl());
  }
}
