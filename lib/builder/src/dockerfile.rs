//! Container recipe synthesis. Pure templating: the same spec and
//! detection always produce byte-identical output, so the whole
//! matrix stays testable without a docker daemon.

use deploypilot_client::entities::build::{
  BuildSpec, Framework, PackageManager,
};

use crate::detect::Detection;

const NODE_IMAGE: &str = "node:20-alpine";
const NGINX_IMAGE: &str = "nginx:alpine";

pub struct Recipe {
  pub dockerfile: String,
  pub warnings: Vec<String>,
}

pub fn synthesize(spec: &BuildSpec, det: &Detection) -> Recipe {
  let mut warnings = Vec::new();
  if !det.lockfile {
    warnings.push(String::from(
      "no lockfile found, falling back to a non-frozen install",
    ));
  }

  // A docker-framework app without a Dockerfile falls back to
  // recipe selection from its other fields.
  let framework = match det.framework {
    Framework::Docker => Framework::Nodejs,
    other => other,
  };

  let dockerfile = match framework {
    Framework::Svelte => svelte_classic(spec, det),
    f if f.is_static() => static_site(spec, det, f),
    Framework::Nextjs => nextjs(spec, det),
    Framework::Nuxt => {
      if det.nuxt_major <= 2 {
        nuxt2(spec, det)
      } else {
        nuxt3(spec, det)
      }
    }
    Framework::Nestjs => nestjs(spec, det),
    _ => nodejs(spec, det),
  };

  Recipe {
    dockerfile,
    warnings,
  }
}

/// Lockfile copy tolerates missing files via globs; only
/// package.json itself is required.
const MANIFEST_COPY: &str = "COPY package.json package-lock.json* yarn.lock* pnpm-lock.yaml* pnpm-workspace.yaml* .npmrc* ./";

fn install_lines(
  lines: &mut Vec<String>,
  manager: PackageManager,
  lockfile: bool,
) {
  if manager == PackageManager::Pnpm {
    lines.push(String::from("RUN npm install -g pnpm"));
  }
  lines.push(String::from(MANIFEST_COPY));
  let install = match (manager, lockfile) {
    (PackageManager::Npm, true) => "npm ci",
    (PackageManager::Npm, false) => "npm install",
    (PackageManager::Yarn, true) => {
      "yarn install --frozen-lockfile"
    }
    (PackageManager::Yarn, false) => "yarn install",
    (PackageManager::Pnpm, true) => {
      "pnpm install --frozen-lockfile"
    }
    (PackageManager::Pnpm, false) => "pnpm install",
  };
  lines.push(format!("RUN {install}"));
}

fn production_install(
  manager: PackageManager,
  lockfile: bool,
) -> &'static str {
  match (manager, lockfile) {
    (PackageManager::Npm, true) => "npm ci --omit=dev",
    (PackageManager::Npm, false) => "npm install --omit=dev",
    (PackageManager::Yarn, _) => "yarn install --production",
    (PackageManager::Pnpm, true) => {
      "pnpm install --prod --frozen-lockfile"
    }
    (PackageManager::Pnpm, false) => "pnpm install --prod",
  }
}

fn run_script(manager: PackageManager, script: &str) -> String {
  match manager {
    PackageManager::Npm => format!("npm run {script}"),
    PackageManager::Yarn => format!("yarn run {script}"),
    PackageManager::Pnpm => format!("pnpm run {script}"),
  }
}

fn build_command(
  spec: &BuildSpec,
  det: &Detection,
) -> Option<String> {
  spec.build_command.clone().filter(|c| !c.is_empty()).or_else(
    || {
      det
        .has_build_script
        .then(|| run_script(det.package_manager, "build"))
    },
  )
}

/// Sorted so the rendered recipe is stable regardless of payload
/// map order.
fn env_lines(lines: &mut Vec<String>, spec: &BuildSpec) {
  let mut vars: Vec<_> = spec.env_vars.iter().collect();
  vars.sort_by(|a, b| a.0.cmp(b.0));
  for (key, value) in vars {
    lines.push(format!("ENV {key}=\"{}\"", escape(value)));
  }
}

fn escape(value: &str) -> String {
  value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Whitespace-split into a JSON array for exec-form entrypoints.
fn exec_array(command: &str) -> String {
  let parts = command
    .split_whitespace()
    .map(|part| format!("\"{}\"", escape(part)))
    .collect::<Vec<_>>()
    .join(", ");
  format!("[{parts}]")
}

fn start_exec(det: &Detection) -> String {
  let start = det
    .start_command
    .clone()
    .filter(|c| !c.is_empty())
    .unwrap_or_else(|| run_script(det.package_manager, "start"));
  exec_array(&start)
}

fn build_stage(
  spec: &BuildSpec,
  det: &Detection,
  stage: &str,
) -> Vec<String> {
  let mut lines = vec![
    format!("FROM {NODE_IMAGE} AS {stage}"),
    String::from("WORKDIR /app"),
  ];
  install_lines(&mut lines, det.package_manager, det.lockfile);
  lines.push(String::from("COPY . ."));
  env_lines(&mut lines, spec);
  lines
}

fn static_site(
  spec: &BuildSpec,
  det: &Detection,
  framework: Framework,
) -> String {
  let mut lines = build_stage(spec, det, "build");
  if framework.needs_legacy_openssl() {
    lines.push(String::from(
      "ENV NODE_OPTIONS=--openssl-legacy-provider",
    ));
  }
  if framework == Framework::React {
    lines.push(String::from("ENV PUBLIC_URL=/"));
  }
  let build = build_command(spec, det)
    .unwrap_or_else(|| run_script(det.package_manager, "build"));
  lines.push(format!("RUN {build}"));
  let out = &det.output_directory;
  // Some toolchains nest the site one level down (Angular 17+
  // puts it under browser/), so locate index.html instead of
  // trusting the declared directory blindly.
  lines.push(format!(
    "RUN target=$(find /app/{out} -name index.html | head -n 1) && \\\n    if [ -z \"$target\" ]; then echo \"index.html not found under /app/{out}\" >&2 && exit 1; fi && \\\n    mkdir -p /app/_output && \\\n    cp -r \"$(dirname \"$target\")/.\" /app/_output/"
  ));
  lines.push(String::new());
  nginx_stage(&mut lines, "build", "/app/_output");
  lines.join("\n")
}

/// Classic (rollup) svelte templates ship a ready public/
/// directory; the whole thing goes to nginx.
fn svelte_classic(spec: &BuildSpec, det: &Detection) -> String {
  let mut lines = build_stage(spec, det, "build");
  let build = build_command(spec, det)
    .unwrap_or_else(|| run_script(det.package_manager, "build"));
  lines.push(format!("RUN {build}"));
  lines.push(String::new());
  nginx_stage(&mut lines, "build", "/app/public");
  lines.join("\n")
}

fn nginx_stage(
  lines: &mut Vec<String>,
  from: &str,
  source: &str,
) {
  lines.push(format!("FROM {NGINX_IMAGE}"));
  lines.push(format!(
    "COPY --from={from} {source} /usr/share/nginx/html"
  ));
  lines.push(String::from("EXPOSE 80"));
  lines.push(String::from("CMD [\"nginx\", \"-g\", \"daemon off;\"]"));
}

fn nextjs(spec: &BuildSpec, det: &Detection) -> String {
  let mut lines = build_stage(spec, det, "builder");
  // next build fails the runtime COPY when public/ is absent.
  lines.push(String::from("RUN mkdir -p public"));
  let build = build_command(spec, det)
    .unwrap_or_else(|| run_script(det.package_manager, "build"));
  lines.push(format!("RUN {build}"));
  lines.push(String::new());
  lines.push(format!("FROM {NODE_IMAGE}"));
  lines.push(String::from("WORKDIR /app"));
  lines.push(String::from("ENV NODE_ENV=production"));
  if det.package_manager == PackageManager::Pnpm {
    lines.push(String::from("RUN npm install -g pnpm"));
  }
  lines.push(String::from(
    "COPY --from=builder /app/.next ./.next",
  ));
  lines.push(String::from(
    "COPY --from=builder /app/node_modules ./node_modules",
  ));
  lines.push(String::from(
    "COPY --from=builder /app/package.json ./package.json",
  ));
  lines.push(String::from(
    "COPY --from=builder /app/public ./public",
  ));
  lines.push(String::from("EXPOSE 3000"));
  lines.push(format!(
    "CMD {}",
    exec_array(&run_script(det.package_manager, "start"))
  ));
  lines.join("\n")
}

/// Nuxt 2 has no self-contained server output; the runtime image
/// carries the whole app and starts through the nuxt cli.
fn nuxt2(spec: &BuildSpec, det: &Detection) -> String {
  let mut lines = build_stage(spec, det, "build");
  let build = build_command(spec, det)
    .unwrap_or_else(|| run_script(det.package_manager, "build"));
  lines.push(format!("RUN {build}"));
  lines.push(String::new());
  lines.push(format!("FROM {NODE_IMAGE}"));
  lines.push(String::from("WORKDIR /app"));
  lines.push(String::from("COPY --from=build /app ."));
  lines.push(String::from("ENV HOST=0.0.0.0"));
  lines.push(String::from("EXPOSE 3000"));
  lines.push(String::from("CMD [\"npx\", \"nuxt\", \"start\"]"));
  lines.join("\n")
}

fn nuxt3(spec: &BuildSpec, det: &Detection) -> String {
  let mut lines = build_stage(spec, det, "build");
  let build = build_command(spec, det)
    .unwrap_or_else(|| run_script(det.package_manager, "build"));
  lines.push(format!("RUN {build}"));
  lines.push(String::new());
  lines.push(format!("FROM {NODE_IMAGE}"));
  lines.push(String::from("WORKDIR /app"));
  lines.push(String::from("ENV NODE_ENV=production"));
  lines.push(String::from(
    "COPY --from=build /app/.output ./.output",
  ));
  lines.push(String::from(
    "COPY --from=build /app/package*.json ./",
  ));
  lines.push(String::from("ENV HOST=0.0.0.0"));
  lines.push(String::from("EXPOSE 3000"));
  lines.push(String::from(
    "CMD [\"node\", \".output/server/index.mjs\"]",
  ));
  lines.join("\n")
}

/// Builder keeps dev dependencies so `nest build` has its cli.
fn nestjs(spec: &BuildSpec, det: &Detection) -> String {
  let port = det.port.unwrap_or(spec.port);
  let mut lines = build_stage(spec, det, "builder");
  let build = build_command(spec, det)
    .unwrap_or_else(|| run_script(det.package_manager, "build"));
  lines.push(format!("RUN {build}"));
  lines.push(String::new());
  lines.push(format!("FROM {NODE_IMAGE}"));
  lines.push(String::from("WORKDIR /app"));
  lines.push(String::from("ENV NODE_ENV=production"));
  lines.push(String::from(
    "COPY --from=builder /app/dist ./dist",
  ));
  lines.push(String::from(
    "COPY --from=builder /app/node_modules ./node_modules",
  ));
  lines.push(String::from(
    "COPY --from=builder /app/package.json ./package.json",
  ));
  lines.push(format!("EXPOSE {port}"));
  lines.push(String::from("CMD [\"node\", \"dist/main\"]"));
  lines.join("\n")
}

fn nodejs(spec: &BuildSpec, det: &Detection) -> String {
  let port = det.port.unwrap_or(spec.port);
  match build_command(spec, det) {
    Some(build) => {
      let mut lines = build_stage(spec, det, "builder");
      lines.push(format!("RUN {build}"));
      lines.push(String::new());
      lines.push(format!("FROM {NODE_IMAGE}"));
      lines.push(String::from("WORKDIR /app"));
      lines.push(String::from("ENV NODE_ENV=production"));
      lines.push(String::from("COPY --from=builder /app ."));
      let prune = match det.package_manager {
        PackageManager::Npm => "npm prune --omit=dev",
        PackageManager::Yarn => "yarn install --production",
        PackageManager::Pnpm => {
          "npm install -g pnpm && pnpm prune --prod"
        }
      };
      lines.push(format!("RUN {prune}"));
      lines.push(format!("EXPOSE {port}"));
      lines.push(format!("CMD {}", start_exec(det)));
      lines.join("\n")
    }
    None => {
      let mut lines = vec![
        format!("FROM {NODE_IMAGE}"),
        String::from("WORKDIR /app"),
      ];
      if det.package_manager == PackageManager::Pnpm {
        lines.push(String::from("RUN npm install -g pnpm"));
      }
      lines.push(String::from(MANIFEST_COPY));
      lines.push(format!(
        "RUN {}",
        production_install(det.package_manager, det.lockfile)
      ));
      lines.push(String::from("COPY . ."));
      env_lines(&mut lines, spec);
      lines.push(format!("EXPOSE {port}"));
      lines.push(format!("CMD {}", start_exec(det)));
      lines.join("\n")
    }
  }
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

  fn detection(
    framework: Framework,
    manager: PackageManager,
    lockfile: bool,
  ) -> Detection {
    Detection {
      package_manager: manager,
      lockfile,
      framework,
      output_directory: String::from("dist"),
      port: None,
      nuxt_major: 3,
      start_command: None,
      has_build_script: true,
      has_dockerfile: false,
    }
  }

  #[test]
  fn nextjs_without_lockfile_uses_plain_install() {
    let recipe = synthesize(
      &spec(Framework::Nextjs),
      &detection(Framework::Nextjs, PackageManager::Npm, false),
    );
    assert!(recipe.dockerfile.contains("RUN npm install\n"));
    assert!(!recipe.dockerfile.contains("npm ci"));
    assert_eq!(recipe.dockerfile.matches("FROM ").count(), 2);
    assert!(recipe.dockerfile.contains("RUN mkdir -p public"));
    assert!(
      recipe.dockerfile.contains("COPY --from=builder /app/.next")
    );
    assert!(recipe.dockerfile.contains("EXPOSE 3000"));
    assert!(
      recipe
        .dockerfile
        .contains("CMD [\"npm\", \"run\", \"start\"]")
    );
    assert_eq!(recipe.warnings.len(), 1);
  }

  #[test]
  fn pnpm_lockfile_gets_global_install_then_frozen() {
    let recipe = synthesize(
      &spec(Framework::Nextjs),
      &detection(Framework::Nextjs, PackageManager::Pnpm, true),
    );
    let global = recipe
      .dockerfile
      .find("RUN npm install -g pnpm")
      .expect("pnpm must be installed globally");
    let frozen = recipe
      .dockerfile
      .find("RUN pnpm install --frozen-lockfile")
      .expect("install must be frozen");
    assert!(global < frozen);
    assert!(recipe.warnings.is_empty());
  }

  #[test]
  fn static_site_locates_index_html() {
    let mut det =
      detection(Framework::Angular, PackageManager::Npm, true);
    det.output_directory = String::from("dist");
    let recipe = synthesize(&spec(Framework::Angular), &det);
    assert!(
      recipe
        .dockerfile
        .contains("find /app/dist -name index.html")
    );
    assert!(recipe.dockerfile.contains("/app/_output"));
    assert!(recipe.dockerfile.contains("FROM nginx:alpine"));
    assert!(recipe.dockerfile.contains(
      "COPY --from=build /app/_output /usr/share/nginx/html"
    ));
    assert!(recipe.dockerfile.contains("EXPOSE 80"));
  }

  #[test]
  fn legacy_webpack_frameworks_get_openssl_flag() {
    let recipe = synthesize(
      &spec(Framework::Angular),
      &detection(Framework::Angular, PackageManager::Npm, true),
    );
    assert!(
      recipe
        .dockerfile
        .contains("ENV NODE_OPTIONS=--openssl-legacy-provider")
    );
    assert!(!recipe.dockerfile.contains("PUBLIC_URL"));

    let recipe = synthesize(
      &spec(Framework::React),
      &detection(Framework::React, PackageManager::Npm, true),
    );
    assert!(recipe.dockerfile.contains("ENV PUBLIC_URL=/"));

    let recipe = synthesize(
      &spec(Framework::ReactVite),
      &detection(Framework::ReactVite, PackageManager::Npm, true),
    );
    assert!(!recipe.dockerfile.contains("openssl-legacy-provider"));
  }

  #[test]
  fn classic_svelte_ships_public_directory() {
    let recipe = synthesize(
      &spec(Framework::Svelte),
      &detection(Framework::Svelte, PackageManager::Npm, true),
    );
    assert!(recipe.dockerfile.contains(
      "COPY --from=build /app/public /usr/share/nginx/html"
    ));
    assert!(!recipe.dockerfile.contains("find /app"));
  }

  #[test]
  fn nuxt_splits_on_major_version() {
    let mut det =
      detection(Framework::Nuxt, PackageManager::Npm, true);
    det.nuxt_major = 2;
    let recipe = synthesize(&spec(Framework::Nuxt), &det);
    assert!(
      recipe.dockerfile.contains("CMD [\"npx\", \"nuxt\", \"start\"]")
    );
    assert!(recipe.dockerfile.contains("ENV HOST=0.0.0.0"));
    assert!(recipe.dockerfile.contains("COPY --from=build /app ."));

    det.nuxt_major = 3;
    let recipe = synthesize(&spec(Framework::Nuxt), &det);
    assert!(
      recipe
        .dockerfile
        .contains("CMD [\"node\", \".output/server/index.mjs\"]")
    );
    assert!(
      recipe
        .dockerfile
        .contains("COPY --from=build /app/.output ./.output")
    );
  }

  #[test]
  fn nestjs_runtime_copies_dist() {
    let recipe = synthesize(
      &spec(Framework::Nestjs),
      &detection(Framework::Nestjs, PackageManager::Npm, true),
    );
    assert!(
      recipe
        .dockerfile
        .contains("COPY --from=builder /app/dist ./dist")
    );
    assert!(
      recipe.dockerfile.contains("CMD [\"node\", \"dist/main\"]")
    );
  }

  #[test]
  fn nodejs_start_command_splits_to_exec_array() {
    let mut spec = spec(Framework::Nodejs);
    spec.start_command = Some(String::from("node server.js --trace"));
    let mut det =
      detection(Framework::Nodejs, PackageManager::Npm, true);
    det.start_command = spec.start_command.clone();
    det.has_build_script = false;
    let recipe = synthesize(&spec, &det);
    assert!(recipe.dockerfile.contains(
      "CMD [\"node\", \"server.js\", \"--trace\"]"
    ));
    // single stage, production install
    assert_eq!(recipe.dockerfile.matches("FROM ").count(), 1);
    assert!(recipe.dockerfile.contains("npm ci --omit=dev"));
  }

  #[test]
  fn nodejs_with_build_prunes_in_runtime() {
    let mut det =
      detection(Framework::Nodejs, PackageManager::Npm, true);
    det.start_command = Some(String::from("node dist/index.js"));
    let recipe = synthesize(&spec(Framework::Nodejs), &det);
    assert_eq!(recipe.dockerfile.matches("FROM ").count(), 2);
    assert!(recipe.dockerfile.contains("npm prune --omit=dev"));
  }

  #[test]
  fn env_vars_render_sorted_and_escaped() {
    let mut s = spec(Framework::Nodejs);
    s.env_vars
      .insert(String::from("ZED"), String::from("z"));
    s.env_vars
      .insert(String::from("API_URL"), String::from("http://x"));
    s.env_vars
      .insert(String::from("QUOTED"), String::from("say \"hi\""));
    let mut det =
      detection(Framework::Nodejs, PackageManager::Npm, true);
    det.has_build_script = false;
    let recipe = synthesize(&s, &det);
    let api = recipe.dockerfile.find("ENV API_URL").unwrap();
    let quoted = recipe.dockerfile.find("ENV QUOTED").unwrap();
    let zed = recipe.dockerfile.find("ENV ZED").unwrap();
    assert!(api < quoted && quoted < zed);
    assert!(
      recipe.dockerfile.contains("ENV QUOTED=\"say \\\"hi\\\"\"")
    );
  }

  #[test]
  fn synthesis_is_deterministic() {
    let s = spec(Framework::Nextjs);
    let det =
      detection(Framework::Nextjs, PackageManager::Yarn, true);
    assert_eq!(
      synthesize(&s, &det).dockerfile,
      synthesize(&s, &det).dockerfile
    );
  }
}
