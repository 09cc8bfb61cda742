//! reqwest-backed [`MimirClient`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Certificate, Identity, Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, instrument};
use url::Url;

use super::{AlertmanagerConfig, ClientConfig, ClientError, MimirClient};
use crate::rules::RuleGroup;

const TENANT_HEADER: &str = "X-Scope-OrgID";
const RULES_PATH: &str = "config/v1/rules";
const ALERTMANAGER_CONFIG_PATH: &str = "api/v1/alerts";
const YAML_CONTENT_TYPE: &str = "application/yaml";
const MAX_ERROR_BODY: usize = 1024;

#[derive(Clone, PartialEq, Eq)]
enum Auth {
    None,
    Basic { user: String, key: String },
    Bearer(String),
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::None => f.write_str("None"),
            Auth::Basic { user, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .finish_non_exhaustive(),
            Auth::Bearer(_) => f.write_str("Bearer(<redacted>)"),
        }
    }
}

/// HTTP client for the Mimir ruler and alertmanager configuration APIs.
#[derive(Debug)]
pub struct HttpClient {
    config: ClientConfig,
    base: Url,
    auth: Auth,
    http: reqwest::Client,
}

impl HttpClient {
    /// Build a client. Reads TLS material from disk.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let base = Url::parse(&config.address)
            .map_err(|e| ClientError::InvalidAddress(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::InvalidAddress(
                "address cannot be used as a base URL".to_string(),
            ));
        }

        let auth = resolve_auth(&config)?;

        let mut headers = HeaderMap::new();
        if let Some(tenant) = &config.tenant_id {
            headers.insert(
                TENANT_HEADER,
                HeaderValue::from_str(tenant).map_err(|_| ClientError::InvalidHeader)?,
            );
        }

        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers);

        if let Some(ca_path) = &config.tls.ca_path {
            let pem = read_tls_file(ca_path)?;
            let bundle = Certificate::from_pem_bundle(&pem).map_err(|source| ClientError::Tls {
                path: ca_path.clone(),
                source,
            })?;
            if bundle.is_empty() {
                return Err(ClientError::EmptyCaBundle(ca_path.clone()));
            }
            for ca in bundle {
                builder = builder.add_root_certificate(ca);
            }
        }

        match (&config.tls.cert_path, &config.tls.key_path) {
            (Some(cert_path), Some(key_path)) => {
                let mut pem = read_tls_file(cert_path)?;
                pem.push(b'\n');
                pem.extend(read_tls_file(key_path)?);
                let identity = Identity::from_pem(&pem).map_err(|source| ClientError::Tls {
                    path: cert_path.clone(),
                    source,
                })?;
                builder = builder.identity(identity);
            }
            (None, None) => {}
            _ => return Err(ClientError::IncompleteIdentity),
        }

        if config.tls.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder.build().map_err(ClientError::Build)?;

        Ok(Self {
            config,
            base,
            auth,
            http,
        })
    }

    /// The configuration the client was built from.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// `{address}{prometheus_http_prefix}/config/v1/rules/{namespace}[/{group}]`
    pub fn rules_url(&self, namespace: &str, group: Option<&str>) -> Result<Url, ClientError> {
        let mut segments = vec![namespace];
        segments.extend(group);
        self.endpoint(&self.config.prometheus_http_prefix, RULES_PATH, &segments)
    }

    /// `{address}/api/v1/alerts`
    ///
    /// Mimir serves the configuration API outside `alertmanager_http_prefix`.
    pub fn alertmanager_config_url(&self) -> Result<Url, ClientError> {
        self.endpoint("", ALERTMANAGER_CONFIG_PATH, &[])
    }

    fn endpoint(&self, prefix: &str, fixed: &str, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                ClientError::InvalidAddress("address cannot be used as a base URL".to_string())
            })?;
            path.pop_if_empty();
            path.extend(prefix.split('/').filter(|s| !s.is_empty()));
            path.extend(fixed.split('/'));
            // Each segment is percent-encoded, `/` included.
            path.extend(segments);
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Auth::None => request,
            Auth::Basic { user, key } => request.basic_auth(user, Some(key)),
            Auth::Bearer(token) => request.bearer_auth(token),
        }
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<String>,
        object: &str,
    ) -> Result<Response, ClientError> {
        let path = url.path().to_string();
        debug!(%method, path = %path, "Sending Mimir request");

        let mut request = self.authorize(self.http.request(method, url));
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, YAML_CONTENT_TYPE).body(body);
        }

        let response = request.send().await.map_err(|source| ClientError::Request {
            path: path.clone(),
            source: source.without_url(),
        })?;

        let status = response.status();
        debug!(path = %path, status = status.as_u16(), "Mimir response");

        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(object.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                body: truncate(body.trim(), MAX_ERROR_BODY),
            });
        }
        Ok(response)
    }

    async fn read_body(response: Response, path: &str) -> Result<String, ClientError> {
        response.text().await.map_err(|source| ClientError::Request {
            path: path.to_string(),
            source: source.without_url(),
        })
    }
}

#[async_trait]
impl MimirClient for HttpClient {
    #[instrument(skip(self, group), fields(group = %group.name))]
    async fn create_rule_group(
        &self,
        namespace: &str,
        group: &RuleGroup,
    ) -> Result<(), ClientError> {
        let url = self.rules_url(namespace, None)?;
        let body = serde_yaml::to_string(group)?;
        self.send(Method::POST, url, Some(body), "rules namespace")
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_rule_group(&self, namespace: &str, group: &str) -> Result<(), ClientError> {
        let url = self.rules_url(namespace, Some(group))?;
        self.send(Method::DELETE, url, None, "rule group").await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_rules(&self, namespace: &str) -> Result<Vec<RuleGroup>, ClientError> {
        let url = self.rules_url(namespace, None)?;
        let path = url.path().to_string();
        let response = self.send(Method::GET, url, None, "rules namespace").await?;
        let body = Self::read_body(response, &path).await?;

        let mut namespaces: BTreeMap<String, Vec<RuleGroup>> = serde_yaml::from_str(&body)?;
        Ok(namespaces.remove(namespace).unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn delete_namespace(&self, namespace: &str) -> Result<(), ClientError> {
        let url = self.rules_url(namespace, None)?;
        self.send(Method::DELETE, url, None, "rules namespace").await?;
        Ok(())
    }

    #[instrument(skip(self, config), fields(templates = config.template_files.len()))]
    async fn create_alertmanager_config(
        &self,
        config: &AlertmanagerConfig,
    ) -> Result<(), ClientError> {
        let url = self.alertmanager_config_url()?;
        let body = serde_yaml::to_string(config)?;
        self.send(Method::POST, url, Some(body), "alertmanager configuration")
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_alertmanager_config(&self) -> Result<AlertmanagerConfig, ClientError> {
        let url = self.alertmanager_config_url()?;
        let path = url.path().to_string();
        let response = self
            .send(Method::GET, url, None, "alertmanager configuration")
            .await?;
        let body = Self::read_body(response, &path).await?;
        Ok(serde_yaml::from_str(&body)?)
    }

    #[instrument(skip(self))]
    async fn delete_alertmanager_config(&self) -> Result<(), ClientError> {
        let url = self.alertmanager_config_url()?;
        self.send(Method::DELETE, url, None, "alertmanager configuration")
            .await?;
        Ok(())
    }
}

fn resolve_auth(config: &ClientConfig) -> Result<Auth, ClientError> {
    let has_basic = config.user.is_some() || !config.key.is_empty();
    match &config.auth_token {
        Some(_) if has_basic => Err(ClientError::ConflictingAuth),
        Some(token) => Ok(Auth::Bearer(token.clone())),
        None if config.key.is_empty() => Ok(Auth::None),
        None => {
            let user = config
                .user
                .clone()
                .or_else(|| config.tenant_id.clone())
                .unwrap_or_default();
            Ok(Auth::Basic {
                user,
                key: config.key.clone(),
            })
        }
    }
}

fn read_tls_file(path: &Path) -> Result<Vec<u8>, ClientError> {
    std::fs::read(path).map_err(|source| ClientError::ReadTls {
        path: path.to_path_buf(),
        source,
    })
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::TlsConfig;
    use std::io::Write;
    use std::path::PathBuf;

    fn config(address: &str) -> ClientConfig {
        ClientConfig {
            address: address.to_string(),
            tenant_id: None,
            user: None,
            key: String::new(),
            auth_token: None,
            tls: TlsConfig::default(),
            user_agent: "terraform-provider-mimirtool/test".to_string(),
            prometheus_http_prefix: "/prometheus".to_string(),
            alertmanager_http_prefix: "/alertmanager".to_string(),
        }
    }

    #[test]
    fn test_rules_url() {
        let client = HttpClient::new(config("https://mimir.example.com")).unwrap();
        assert_eq!(
            client.rules_url("infra", None).unwrap().as_str(),
            "https://mimir.example.com/prometheus/config/v1/rules/infra"
        );
        assert_eq!(
            client.rules_url("infra", Some("cpu")).unwrap().as_str(),
            "https://mimir.example.com/prometheus/config/v1/rules/infra/cpu"
        );
    }

    #[test]
    fn test_rules_url_encodes_segments() {
        let client = HttpClient::new(config("https://mimir.example.com")).unwrap();
        let url = client.rules_url("team/a", Some("high cpu")).unwrap();
        assert_eq!(url.path(), "/prometheus/config/v1/rules/team%2Fa/high%20cpu");
    }

    #[test]
    fn test_address_path_and_custom_prefix() {
        let mut cfg = config("https://gateway.example.com/mimir/");
        cfg.prometheus_http_prefix = "api/prom".to_string();
        let client = HttpClient::new(cfg).unwrap();
        assert_eq!(
            client.rules_url("ns", None).unwrap().path(),
            "/mimir/api/prom/config/v1/rules/ns"
        );
        assert_eq!(
            client.alertmanager_config_url().unwrap().path(),
            "/mimir/api/v1/alerts"
        );
    }

    #[test]
    fn test_invalid_address() {
        let err = HttpClient::new(config("not a url")).unwrap_err();
        assert!(matches!(err, ClientError::InvalidAddress(_)));
    }

    #[test]
    fn test_auth_resolution() {
        let mut cfg = config("http://localhost:9009");
        assert_eq!(resolve_auth(&cfg).unwrap(), Auth::None);

        cfg.tenant_id = Some("team-a".to_string());
        cfg.key = "secret".to_string();
        assert_eq!(
            resolve_auth(&cfg).unwrap(),
            Auth::Basic {
                user: "team-a".to_string(),
                key: "secret".to_string()
            }
        );

        cfg.user = Some("admin".to_string());
        assert_eq!(
            resolve_auth(&cfg).unwrap(),
            Auth::Basic {
                user: "admin".to_string(),
                key: "secret".to_string()
            }
        );

        cfg.auth_token = Some("token".to_string());
        assert!(matches!(resolve_auth(&cfg), Err(ClientError::ConflictingAuth)));

        cfg.user = None;
        cfg.key = String::new();
        assert_eq!(resolve_auth(&cfg).unwrap(), Auth::Bearer("token".to_string()));
    }

    #[test]
    fn test_invalid_tenant_header() {
        let mut cfg = config("http://localhost:9009");
        cfg.tenant_id = Some("bad\ntenant".to_string());
        assert!(matches!(
            HttpClient::new(cfg),
            Err(ClientError::InvalidHeader)
        ));
    }

    #[test]
    fn test_missing_tls_file_names_path() {
        let mut cfg = config("https://mimir.example.com");
        cfg.tls.ca_path = Some("/nonexistent/ca.pem".into());
        let err = HttpClient::new(cfg).unwrap_err();
        assert!(matches!(err, ClientError::ReadTls { .. }));
        assert!(err.to_string().contains("/nonexistent/ca.pem"));
    }

    #[test]
    fn test_cert_without_key() {
        let cert = tempfile::NamedTempFile::new().unwrap();
        let mut cfg = config("https://mimir.example.com");
        cfg.tls.cert_path = Some(cert.path().to_path_buf());
        assert!(matches!(
            HttpClient::new(cfg),
            Err(ClientError::IncompleteIdentity)
        ));
    }

    #[test]
    fn test_malformed_identity() {
        let mut cert = tempfile::NamedTempFile::new().unwrap();
        let mut key = tempfile::NamedTempFile::new().unwrap();
        writeln!(cert, "not a certificate").unwrap();
        writeln!(key, "not a key").unwrap();

        let mut cfg = config("https://mimir.example.com");
        cfg.tls.cert_path = Some(cert.path().to_path_buf());
        cfg.tls.key_path = Some(key.path().to_path_buf());
        let err = HttpClient::new(cfg).unwrap_err();
        assert!(matches!(err, ClientError::Tls { .. }));
    }

    fn testdata(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("src/client/testdata")
            .join(name)
    }

    #[test]
    fn test_ca_bundle_builds() {
        let mut bundle = tempfile::NamedTempFile::new().unwrap();
        bundle
            .write_all(&std::fs::read(testdata("ca.pem")).unwrap())
            .unwrap();
        bundle
            .write_all(&std::fs::read(testdata("client.pem")).unwrap())
            .unwrap();

        let mut cfg = config("https://mimir.example.com");
        cfg.tls.ca_path = Some(bundle.path().to_path_buf());
        assert!(HttpClient::new(cfg).is_ok());

        let mut cfg = config("https://mimir.example.com");
        cfg.tls.ca_path = Some(testdata("ca.pem"));
        assert!(HttpClient::new(cfg).is_ok());
    }

    #[test]
    fn test_ca_without_certificates_is_rejected() {
        let mut ca = tempfile::NamedTempFile::new().unwrap();
        writeln!(ca, "not a certificate").unwrap();

        let mut cfg = config("https://mimir.example.com");
        cfg.tls.ca_path = Some(ca.path().to_path_buf());
        let err = HttpClient::new(cfg).unwrap_err();
        assert!(matches!(
            err,
            ClientError::EmptyCaBundle(_) | ClientError::Tls { .. }
        ));
        assert!(err.to_string().contains(&ca.path().display().to_string()));
    }

    #[test]
    fn test_client_identity_builds() {
        let mut cfg = config("https://mimir.example.com");
        cfg.tls.ca_path = Some(testdata("ca.pem"));
        cfg.tls.cert_path = Some(testdata("client.pem"));
        cfg.tls.key_path = Some(testdata("client-key.pem"));
        let client = HttpClient::new(cfg).unwrap();
        assert_eq!(client.config().tls.key_path, Some(testdata("client-key.pem")));
    }

    #[test]
    fn test_insecure_skip_verify_builds() {
        let mut cfg = config("https://mimir.example.com");
        cfg.tls.insecure_skip_verify = true;
        let client = HttpClient::new(cfg).unwrap();
        assert!(client.config().tls.insecure_skip_verify);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééé", 3), "é...");
    }
}
