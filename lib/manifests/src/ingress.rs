use deploypilot_client::entities::command::DatabaseKind;

use crate::{database_params, yaml_escape};

/// Stable per-domain object name, so removal can address the
/// Ingress created for a given (app, domain) pair.
pub fn ingress_name(app_name: &str, domain: &str) -> String {
  format!("{app_name}-{}", domain.replace('.', "-"))
}

/// HTTPS ingress for a custom domain, certificate managed by
/// cert-manager.
pub fn render_app_ingress(
  namespace: &str,
  app_name: &str,
  domain: &str,
  port: u16,
) -> String {
  let name = ingress_name(app_name, domain);
  let host = yaml_escape(domain);
  format!(
    "apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: {name}
  namespace: {namespace}
  labels:
    app: {app_name}
    app.kubernetes.io/managed-by: deploypilot
  annotations:
    cert-manager.io/cluster-issuer: letsencrypt-prod
    traefik.ingress.kubernetes.io/router.entrypoints: websecure
spec:
  tls:
    - hosts:
        - \"{host}\"
      secretName: {name}-tls
  rules:
    - host: \"{host}\"
      http:
        paths:
          - path: /
            pathType: Prefix
            backend:
              service:
                name: {app_name}
                port:
                  number: {port}
"
  )
}

/// SNI-routed TLS passthrough to a database service. Matched by
/// hostname in the ClientHello, so the database's own TLS (or the
/// raw protocol for redis) passes through untouched.
pub fn render_ingress_route_tcp(
  namespace: &str,
  db_name: &str,
  kind: DatabaseKind,
  host: &str,
) -> String {
  let port = database_params(kind).port;
  let entry_point = kind.to_string();
  let host = yaml_escape(host);
  format!(
    "apiVersion: traefik.io/v1alpha1
kind: IngressRouteTCP
metadata:
  name: {db_name}-external
  namespace: {namespace}
  labels:
    app: {db_name}
    app.kubernetes.io/managed-by: deploypilot
spec:
  entryPoints:
    - {entry_point}
  routes:
    - match: HostSNI(`{host}`)
      services:
        - name: {db_name}
          port: {port}
  tls:
    passthrough: true
"
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ingress_names_are_stable() {
    assert_eq!(
      ingress_name("hello", "app.example.com"),
      "hello-app-example-com"
    );
  }

  #[test]
  fn app_ingress_routes_domain_to_service() {
    let ingress =
      render_app_ingress("dp-u1", "hello", "app.example.com", 3000);
    assert!(ingress.contains("host: \"app.example.com\""));
    assert!(ingress.contains("number: 3000"));
    assert!(ingress.contains("cert-manager.io/cluster-issuer"));
    assert!(
      ingress.contains("secretName: hello-app-example-com-tls")
    );
  }

  #[test]
  fn tcp_route_is_sni_passthrough() {
    let route = render_ingress_route_tcp(
      "dp-u1",
      "main-db",
      DatabaseKind::Postgres,
      "main-db.dp-u1.db.example.com",
    );
    assert!(
      route.contains("HostSNI(`main-db.dp-u1.db.example.com`)")
    );
    assert!(route.contains("passthrough: true"));
    assert!(route.contains("port: 5432"));
    assert!(route.contains("- postgres"));
  }
}
