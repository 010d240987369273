use deploypilot_client::entities::command::DatabaseKind;

use crate::{database_params, probe_command, yaml_escape};

/// Typed input for the database object renderers.
pub struct DatabaseManifest<'a> {
  pub namespace: &'a str,
  pub db_name: &'a str,
  pub kind: DatabaseKind,
  pub version: &'a str,
  pub username: &'a str,
  pub password: &'a str,
  pub database: &'a str,
  pub storage_size: &'a str,
  pub memory_limit: &'a str,
}

pub fn render_database_secret(spec: &DatabaseManifest) -> String {
  let DatabaseManifest {
    namespace,
    db_name,
    kind,
    username,
    password,
    database,
    ..
  } = spec;
  let entries = match kind {
    DatabaseKind::Postgres => format!(
      "  POSTGRES_USER: \"{}\"\n  POSTGRES_PASSWORD: \"{}\"\n  POSTGRES_DB: \"{}\"",
      yaml_escape(username),
      yaml_escape(password),
      yaml_escape(database),
    ),
    DatabaseKind::Mongodb => format!(
      "  MONGO_INITDB_ROOT_USERNAME: \"{}\"\n  MONGO_INITDB_ROOT_PASSWORD: \"{}\"\n  MONGO_INITDB_DATABASE: \"{}\"",
      yaml_escape(username),
      yaml_escape(password),
      yaml_escape(database),
    ),
    DatabaseKind::Redis => format!(
      "  REDIS_PASSWORD: \"{}\"",
      yaml_escape(password),
    ),
  };
  format!(
    "apiVersion: v1
kind: Secret
metadata:
  name: {db_name}-secret
  namespace: {namespace}
  labels:
    app: {db_name}
    app.kubernetes.io/managed-by: deploypilot
type: Opaque
stringData:
{entries}
"
  )
}

pub fn render_database_pvc(spec: &DatabaseManifest) -> String {
  let DatabaseManifest {
    namespace,
    db_name,
    storage_size,
    ..
  } = spec;
  format!(
    "apiVersion: v1
kind: PersistentVolumeClaim
metadata:
  name: {db_name}-pvc
  namespace: {namespace}
  labels:
    app: {db_name}
    app.kubernetes.io/managed-by: deploypilot
spec:
  accessModes:
    - ReadWriteOnce
  resources:
    requests:
      storage: {storage_size}
"
  )
}

/// Headless service so the StatefulSet pod gets a stable DNS name
/// `<db>.<namespace>.svc.cluster.local`.
pub fn render_database_service(spec: &DatabaseManifest) -> String {
  let DatabaseManifest {
    namespace, db_name, ..
  } = spec;
  let port = database_params(spec.kind).port;
  format!(
    "apiVersion: v1
kind: Service
metadata:
  name: {db_name}
  namespace: {namespace}
  labels:
    app: {db_name}
    app.kubernetes.io/managed-by: deploypilot
spec:
  clusterIP: None
  selector:
    app: {db_name}
  ports:
    - port: {port}
      targetPort: {port}
"
  )
}

pub fn render_database_statefulset(
  spec: &DatabaseManifest,
) -> String {
  let DatabaseManifest {
    namespace,
    db_name,
    kind,
    version,
    username,
    memory_limit,
    ..
  } = spec;
  let params = database_params(*kind);
  let image = format!("{}:{}", params.image, yaml_escape(version));
  let container_name = kind.to_string();
  let probe = probe_command(*kind, username);

  // Persistence and auth for redis are switched on via the
  // container command, not the image defaults.
  let command_line = match kind {
    DatabaseKind::Redis => {
      "\n          command: [\"redis-server\", \"--appendonly\", \"yes\", \"--requirepass\", \"$(REDIS_PASSWORD)\"]"
    }
    _ => "",
  };

  let sub_path = match params.mount_sub_path {
    Some(sub_path) => format!("\n              subPath: {sub_path}"),
    None => String::new(),
  };

  format!(
    "apiVersion: apps/v1
kind: StatefulSet
metadata:
  name: {db_name}
  namespace: {namespace}
  labels:
    app: {db_name}
    app.kubernetes.io/managed-by: deploypilot
spec:
  serviceName: {db_name}
  replicas: 1
  selector:
    matchLabels:
      app: {db_name}
  template:
    metadata:
      labels:
        app: {db_name}
    spec:
      containers:
        - name: {container_name}
          image: \"{image}\"{command_line}
          ports:
            - containerPort: {port}
          envFrom:
            - secretRef:
                name: {db_name}-secret
          resources:
            requests:
              memory: \"{memory}\"
            limits:
              memory: \"{memory}\"
          volumeMounts:
            - name: data
              mountPath: {mount_path}{sub_path}
          readinessProbe:
            exec:
              command: {probe}
            initialDelaySeconds: {readiness_initial}
            periodSeconds: {readiness_period}
            timeoutSeconds: {probe_timeout}
          livenessProbe:
            exec:
              command: {probe}
            initialDelaySeconds: 30
            periodSeconds: 10
            timeoutSeconds: {probe_timeout}
      volumes:
        - name: data
          persistentVolumeClaim:
            claimName: {db_name}-pvc
",
    port = params.port,
    memory = yaml_escape(memory_limit),
    mount_path = params.mount_path,
    readiness_initial = params.readiness_initial_secs,
    readiness_period = params.readiness_period_secs,
    probe_timeout = params.probe_timeout_secs,
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  fn postgres_spec() -> DatabaseManifest<'static> {
    DatabaseManifest {
      namespace: "dp-u1",
      db_name: "main-db",
      kind: DatabaseKind::Postgres,
      version: "15",
      username: "admin",
      password: "hunter2",
      database: "main-db",
      storage_size: "10Gi",
      memory_limit: "512Mi",
    }
  }

  #[test]
  fn postgres_secret_keys() {
    let secret = render_database_secret(&postgres_spec());
    assert!(secret.contains("POSTGRES_USER: \"admin\""));
    assert!(secret.contains("POSTGRES_PASSWORD: \"hunter2\""));
    assert!(secret.contains("POSTGRES_DB: \"main-db\""));
    assert!(secret.contains("type: Opaque"));
    assert!(secret.contains("stringData:"));
  }

  #[test]
  fn secret_escapes_quotes_in_password() {
    let mut spec = postgres_spec();
    spec.password = r#"pa"ss"#;
    let secret = render_database_secret(&spec);
    assert!(secret.contains(r#"POSTGRES_PASSWORD: "pa\"ss""#));
  }

  #[test]
  fn pvc_requests_declared_storage() {
    let pvc = render_database_pvc(&postgres_spec());
    assert!(pvc.contains("storage: 10Gi"));
    assert!(pvc.contains("name: main-db-pvc"));
  }

  #[test]
  fn service_is_headless_on_database_port() {
    let service = render_database_service(&postgres_spec());
    assert!(service.contains("clusterIP: None"));
    assert!(service.contains("port: 5432"));
  }

  #[test]
  fn postgres_statefulset_probes_and_mount() {
    let sts = render_database_statefulset(&postgres_spec());
    assert!(
      sts.contains(r#"command: ["pg_isready", "-U", "admin"]"#)
    );
    assert!(sts.contains("image: \"postgres:15\""));
    assert!(sts.contains("mountPath: /var/lib/postgresql/data"));
    assert!(sts.contains("subPath: postgres"));
    assert!(sts.contains("initialDelaySeconds: 5"));
    assert!(sts.contains("memory: \"512Mi\""));
    assert!(sts.contains("claimName: main-db-pvc"));
    // liveness timing is shared across kinds
    assert!(sts.contains("initialDelaySeconds: 30"));
  }

  #[test]
  fn redis_statefulset_enables_persistence_and_auth() {
    let mut spec = postgres_spec();
    spec.kind = DatabaseKind::Redis;
    spec.version = "7";
    let sts = render_database_statefulset(&spec);
    assert!(sts.contains("--appendonly"));
    assert!(sts.contains("--requirepass"));
    assert!(sts.contains("containerPort: 6379"));
    assert!(!sts.contains("subPath"));
  }

  #[test]
  fn rendering_is_deterministic() {
    let spec = postgres_spec();
    assert_eq!(
      render_database_statefulset(&spec),
      render_database_statefulset(&spec)
    );
  }
}
