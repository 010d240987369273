//! Deterministic text renderers for the Kubernetes objects the
//! agent applies. Same inputs produce byte-identical YAML, which
//! keeps the apply path declarative and the renderers testable.

use deploypilot_client::entities::command::DatabaseKind;

mod database;
mod ingress;

pub use database::{
  DatabaseManifest, render_database_pvc, render_database_secret,
  render_database_service, render_database_statefulset,
};
pub use ingress::{
  ingress_name, render_app_ingress, render_ingress_route_tcp,
};

/// Escapes a value for insertion between double quotes in YAML.
pub fn yaml_escape(value: &str) -> String {
  value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Static per-database parameters.
pub struct DatabaseParams {
  pub port: u16,
  pub image: &'static str,
  pub mount_path: &'static str,
  pub mount_sub_path: Option<&'static str>,
  pub readiness_initial_secs: u32,
  pub readiness_period_secs: u32,
  pub probe_timeout_secs: u32,
}

pub fn database_params(kind: DatabaseKind) -> DatabaseParams {
  match kind {
    DatabaseKind::Postgres => DatabaseParams {
      port: 5432,
      image: "postgres",
      mount_path: "/var/lib/postgresql/data",
      mount_sub_path: Some("postgres"),
      readiness_initial_secs: 5,
      readiness_period_secs: 5,
      probe_timeout_secs: 5,
    },
    DatabaseKind::Mongodb => DatabaseParams {
      port: 27017,
      image: "mongo",
      mount_path: "/data/db",
      mount_sub_path: None,
      readiness_initial_secs: 10,
      readiness_period_secs: 10,
      probe_timeout_secs: 10,
    },
    DatabaseKind::Redis => DatabaseParams {
      port: 6379,
      image: "redis",
      mount_path: "/data",
      mount_sub_path: None,
      readiness_initial_secs: 10,
      readiness_period_secs: 10,
      probe_timeout_secs: 10,
    },
  }
}

/// Exec probe command per database, rendered as a YAML flow
/// sequence of double-quoted strings.
pub fn probe_command(kind: DatabaseKind, username: &str) -> String {
  let parts: Vec<String> = match kind {
    DatabaseKind::Postgres => vec![
      String::from("pg_isready"),
      String::from("-U"),
      username.to_string(),
    ],
    DatabaseKind::Mongodb => vec![
      String::from("mongosh"),
      String::from("--eval"),
      String::from("db.adminCommand('ping')"),
    ],
    DatabaseKind::Redis => {
      vec![String::from("redis-cli"), String::from("ping")]
    }
  };
  let quoted = parts
    .iter()
    .map(|part| format!("\"{}\"", yaml_escape(part)))
    .collect::<Vec<_>>()
    .join(", ");
  format!("[{quoted}]")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn escapes_double_quotes() {
    assert_eq!(yaml_escape(r#"pa"ss"#), r#"pa\"ss"#);
    assert_eq!(yaml_escape(r#"a\b"#), r#"a\\b"#);
    assert_eq!(yaml_escape("plain"), "plain");
  }

  #[test]
  fn postgres_probe_matches_contract() {
    assert_eq!(
      probe_command(DatabaseKind::Postgres, "admin"),
      r#"["pg_isready", "-U", "admin"]"#
    );
  }

  #[test]
  fn database_parameter_table() {
    let pg = database_params(DatabaseKind::Postgres);
    assert_eq!(pg.port, 5432);
    assert_eq!(pg.mount_sub_path, Some("postgres"));
    assert_eq!(pg.readiness_period_secs, 5);
    let mongo = database_params(DatabaseKind::Mongodb);
    assert_eq!(mongo.port, 27017);
    assert_eq!(mongo.mount_path, "/data/db");
    assert_eq!(mongo.probe_timeout_secs, 10);
    let redis = database_params(DatabaseKind::Redis);
    assert_eq!(redis.port, 6379);
    assert_eq!(redis.mount_path, "/data");
  }
}
