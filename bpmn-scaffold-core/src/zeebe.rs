//! Camunda 8 REST deployment client.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::deploy::{DeploymentAdapter, Resource};
use crate::error::{Result, ScaffoldError};
use crate::types::ProcessMetadata;

pub const DEFAULT_DEPLOY_TIMEOUT: Duration = Duration::from_secs(10);

/// Tokens are renewed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Upper bound on a token's cached lifetime, whatever the issuer claims.
const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone, Debug)]
pub struct ZeebeSettings {
    /// REST gateway base, e.g. `http://localhost:8080`.
    pub base_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// OAuth token endpoint.
    pub auth_server_url: Option<String>,
    pub timeout: Duration,
}

impl ZeebeSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client_id: None,
            client_secret: None,
            auth_server_url: None,
            timeout: DEFAULT_DEPLOY_TIMEOUT,
        }
    }
}

// ── OAuth ──

#[derive(Debug, Clone)]
struct Token {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Caches an OAuth2 access token for the engine API.
///
/// The first token comes from the client-credentials grant. Once it expires
/// the refresh token is tried, falling back to client credentials if the
/// refresh is rejected.
pub struct TokenManager {
    http: Client,
    auth_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<Token>>,
}

impl TokenManager {
    pub fn new(http: Client, auth_url: String, client_id: String, client_secret: String) -> Self {
        Self {
            http,
            auth_url,
            client_id,
            client_secret,
            token: Mutex::new(None),
        }
    }

    pub async fn bearer(&self) -> Result<String> {
        let mut guard = self.token.lock().await;

        if let Some(token) = guard.as_ref() {
            if token.expires_at > Instant::now() + EXPIRY_MARGIN {
                return Ok(token.access_token.clone());
            }
        }

        let refreshed = match guard.as_ref().and_then(|t| t.refresh_token.clone()) {
            Some(refresh) => match self.refresh(&refresh).await {
                Ok(token) => token,
                Err(e) => {
                    warn!(error = %e, "Token refresh failed, requesting a new token");
                    self.client_credentials().await?
                }
            },
            None => self.client_credentials().await?,
        };

        let access = refreshed.access_token.clone();
        *guard = Some(refreshed);
        Ok(access)
    }

    async fn client_credentials(&self) -> Result<Token> {
        self.request(&[
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Token> {
        self.request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ])
        .await
    }

    async fn request(&self, params: &[(&str, &str)]) -> Result<Token> {
        let response = self
            .http
            .post(&self.auth_url)
            .form(params)
            .send()
            .await
            .map_err(|e| ScaffoldError::Deployment(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScaffoldError::Deployment(format!(
                "token endpoint returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| ScaffoldError::Deployment(format!("invalid token response: {}", e)))?;
        debug!(expires_in = ?parsed.expires_in, "Obtained access token");

        Ok(Token {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token,
            expires_at: Instant::now() + token_lifetime(parsed.expires_in),
        })
    }
}

fn token_lifetime(expires_in: Option<u64>) -> Duration {
    Duration::from_secs(expires_in.unwrap_or(300)).min(MAX_TOKEN_LIFETIME)
}

// ── Deployer ──

pub struct ZeebeRestDeployer {
    http: Client,
    base_url: String,
    tokens: Option<TokenManager>,
}

impl ZeebeRestDeployer {
    pub fn new(settings: ZeebeSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ScaffoldError::Config(format!("failed to create HTTP client: {}", e)))?;

        let tokens = match (
            settings.auth_server_url,
            settings.client_id,
            settings.client_secret,
        ) {
            (Some(url), Some(id), Some(secret)) => Some(TokenManager::new(http.clone(), url, id, secret)),
            _ => None,
        };

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }
}

#[async_trait]
impl DeploymentAdapter for ZeebeRestDeployer {
    async fn deploy(&self, resource: &Resource, forms: &[Resource]) -> Result<Vec<ProcessMetadata>> {
        let mut form = Form::new();
        for item in std::iter::once(resource).chain(forms) {
            let part = Part::bytes(item.content.clone())
                .file_name(item.name.clone())
                .mime_str("application/octet-stream")
                .map_err(|e| ScaffoldError::Internal(e.to_string()))?;
            form = form.part("resources", part);
        }

        let url = format!("{}/v2/deployments", self.base_url);
        let mut request = self.http.post(&url).multipart(form);
        if let Some(tokens) = &self.tokens {
            request = request.bearer_auth(tokens.bearer().await?);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ScaffoldError::Deployment(format!("{}: {}", url, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ScaffoldError::Deployment(format!("reading response: {}", e)))?;
        if !status.is_success() {
            return Err(ScaffoldError::Deployment(format!(
                "engine returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let processes = parse_deployment(&body)?;
        info!(
            resource = %resource.name,
            forms = forms.len(),
            processes = processes.len(),
            "Deployed resource"
        );
        Ok(processes)
    }
}

// ── Response shape ──

#[derive(Deserialize)]
struct DeploymentResponse {
    #[serde(default)]
    deployments: Vec<DeploymentEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentEntry {
    #[serde(default)]
    process_definition: Option<DeployedProcess>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeployedProcess {
    process_definition_id: String,
    process_definition_version: i32,
    #[serde(deserialize_with = "key_from_string_or_number")]
    process_definition_key: i64,
    resource_name: String,
}

/// Engine keys are 64-bit and arrive as JSON strings or numbers.
fn key_from_string_or_number<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Key {
        Number(i64),
        Text(String),
    }
    match Key::deserialize(d)? {
        Key::Number(n) => Ok(n),
        Key::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

fn parse_deployment(body: &str) -> Result<Vec<ProcessMetadata>> {
    let parsed: DeploymentResponse = serde_json::from_str(body)
        .map_err(|e| ScaffoldError::Deployment(format!("invalid deployment response: {}", e)))?;

    let processes: Vec<ProcessMetadata> = parsed
        .deployments
        .into_iter()
        .filter_map(|d| d.process_definition)
        .map(|p| ProcessMetadata {
            bpmn_process_id: p.process_definition_id,
            version: p.process_definition_version,
            process_definition_key: p.process_definition_key,
            resource_name: p.resource_name,
        })
        .collect();

    if processes.is_empty() {
        return Err(ScaffoldError::Deployment("nothing was deployed".to_string()));
    }
    Ok(processes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_lifetime_is_capped() {
        assert_eq!(token_lifetime(None), Duration::from_secs(300));
        assert_eq!(token_lifetime(Some(60)), Duration::from_secs(60));
        assert_eq!(token_lifetime(Some(u64::MAX)), MAX_TOKEN_LIFETIME);
        // The cached deadline must stay representable.
        let _ = Instant::now() + token_lifetime(Some(u64::MAX));
    }

    #[test]
    fn parses_string_and_numeric_keys() {
        let body = r#"{
          "deploymentKey": "2251799813685250",
          "tenantId": "<default>",
          "deployments": [
            {"processDefinition": {
              "processDefinitionId": "order",
              "processDefinitionVersion": 2,
              "resourceName": "order.bpmn",
              "tenantId": "<default>",
              "processDefinitionKey": "2251799813685249"
            }},
            {"form": {"formId": "review", "version": 1, "formKey": "2251799813685251"}},
            {"processDefinition": {
              "processDefinitionId": "refund",
              "processDefinitionVersion": 1,
              "resourceName": "order.bpmn",
              "processDefinitionKey": 2251799813685252
            }}
          ]
        }"#;
        let processes = parse_deployment(body).unwrap();
        assert_eq!(processes.len(), 2);
        assert_eq!(processes[0].bpmn_process_id, "order");
        assert_eq!(processes[0].version, 2);
        assert_eq!(processes[0].process_definition_key, 2251799813685249);
        assert_eq!(processes[1].process_definition_key, 2251799813685252);
    }

    #[test]
    fn form_only_deployment_is_an_error() {
        let body = r#"{"deployments": [{"form": {"formId": "review"}}]}"#;
        assert!(matches!(
            parse_deployment(body),
            Err(ScaffoldError::Deployment(_))
        ));
    }

    #[test]
    fn malformed_response_is_an_error() {
        assert!(matches!(
            parse_deployment("<html>"),
            Err(ScaffoldError::Deployment(_))
        ));
    }

    #[test]
    fn auth_requires_all_three_settings() {
        let mut settings = ZeebeSettings::new("http://localhost:8080/");
        settings.client_id = Some("id".to_string());
        let deployer = ZeebeRestDeployer::new(settings.clone()).unwrap();
        assert!(deployer.tokens.is_none());
        assert_eq!(deployer.base_url, "http://localhost:8080");

        settings.client_secret = Some("secret".to_string());
        settings.auth_server_url = Some("http://localhost:18080/token".to_string());
        let deployer = ZeebeRestDeployer::new(settings).unwrap();
        assert!(deployer.tokens.is_some());
    }

    #[tokio::test]
    async fn unreachable_engine_is_deployment_error() {
        let mut settings = ZeebeSettings::new("http://127.0.0.1:9");
        settings.timeout = Duration::from_millis(500);
        let deployer = ZeebeRestDeployer::new(settings).unwrap();
        let err = deployer
            .deploy(&Resource::new("order.bpmn", b"<definitions/>".to_vec()), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ScaffoldError::Deployment(_)));
    }
}
