use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::config::SentiscopeConfig;
use crate::error::{Result, SentiscopeError};
use crate::error_recovery::StatusProbe;
use crate::types::{Platform, SocialRecord};

/// Submits one batch to the analysis backend and returns the raw response
/// body. Shape validation is left to the orchestrator.
#[async_trait]
pub trait BatchSubmitter: Send + Sync {
    async fn submit(&self, batch: &[SocialRecord]) -> Result<Value>;
    fn name(&self) -> &str;
}

// ============================================================================
// Request types
// ============================================================================

/// Platform secrets for `/verify-credentials` and `/collect`.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Twitter {
        bearer_token: String,
    },
    Instagram {
        session_id: String,
        ds_user_id: String,
        csrf_token: String,
    },
}

impl Credentials {
    pub fn platform(&self) -> Platform {
        match self {
            Credentials::Twitter { .. } => Platform::Twitter,
            Credentials::Instagram { .. } => Platform::Instagram,
        }
    }

    /// Request fields carrying the secrets, plus `source`.
    fn to_fields(&self) -> serde_json::Map<String, Value> {
        let value = match self {
            Credentials::Twitter { bearer_token } => json!({
                "source": "twitter",
                "twitter_bearer_token": bearer_token,
            }),
            Credentials::Instagram {
                session_id,
                ds_user_id,
                csrf_token,
            } => json!({
                "source": "instagram",
                "instagram_session_id": session_id,
                "instagram_ds_user_id": ds_user_id,
                "instagram_csrf_token": csrf_token,
            }),
        };
        match value {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let missing = match self {
            Credentials::Twitter { bearer_token } => bearer_token.trim().is_empty(),
            Credentials::Instagram {
                session_id,
                ds_user_id,
                csrf_token,
            } => [session_id, ds_user_id, csrf_token]
                .iter()
                .any(|s| s.trim().is_empty()),
        };
        if missing {
            return Err(SentiscopeError::Validation(format!(
                "{} credentials are incomplete",
                self.platform().label()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Twitter { .. } => f
                .debug_struct("Twitter")
                .field("bearer_token", &"[REDACTED]")
                .finish(),
            Credentials::Instagram { .. } => f
                .debug_struct("Instagram")
                .field("session_id", &"[REDACTED]")
                .field("ds_user_id", &"[REDACTED]")
                .field("csrf_token", &"[REDACTED]")
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
    Hashtag,
    Username,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Hashtag => "hashtag",
            SearchType::Username => "username",
        }
    }
}

impl FromStr for SearchType {
    type Err = SentiscopeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "hashtag" => Ok(SearchType::Hashtag),
            "username" => Ok(SearchType::Username),
            other => Err(SentiscopeError::Validation(format!(
                "search type must be 'hashtag' or 'username', got '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// HTTP client
// ============================================================================

/// JSON-over-HTTP client for the analysis backend.
#[derive(Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SentiscopeError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &SentiscopeConfig) -> Result<Self> {
        Self::new(&config.server_url, config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Maps a non-2xx response to `Api`, preferring the body's `error` field.
    async fn read_json(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(String::from))
                .unwrap_or(body);
            return Err(SentiscopeError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json::<Value>().await?)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        debug!("POST {}", path);
        let response = self.client.post(self.url(path)).json(body).send().await?;
        Self::read_json(response).await
    }

    #[instrument(skip(self), fields(url = %self.base_url))]
    pub async fn ping(&self) -> Result<()> {
        let response = self.client.get(self.url("/ping")).send().await?;
        let body = Self::read_json(response).await?;
        match body.get("status").and_then(Value::as_str) {
            Some("ok") => Ok(()),
            other => Err(SentiscopeError::Api {
                status: 200,
                message: format!("unexpected ping status: {:?}", other),
            }),
        }
    }

    #[instrument(skip(self, credentials), fields(source = %credentials.platform()))]
    pub async fn verify_credentials(&self, credentials: &Credentials) -> Result<()> {
        self.post_json("/verify-credentials", &Value::Object(credentials.to_fields()))
            .await?;
        Ok(())
    }

    /// Raw platform objects from `/collect`.
    #[instrument(skip(self, credentials), fields(source = %credentials.platform()))]
    pub async fn collect(
        &self,
        credentials: &Credentials,
        search_type: SearchType,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<Value>> {
        let mut body = credentials.to_fields();
        body.insert("search_type".into(), json!(search_type.as_str()));
        body.insert("query".into(), json!(query));
        body.insert("max_results".into(), json!(max_results));

        let response = self.post_json("/collect", &Value::Object(body)).await?;
        match response.get("data") {
            Some(Value::Array(items)) => Ok(items.clone()),
            _ => Err(SentiscopeError::Network(
                "collect response is missing a 'data' array".to_string(),
            )),
        }
    }

    #[instrument(skip(self, records), fields(batch_len = records.len()))]
    pub async fn analyze(&self, records: &[SocialRecord]) -> Result<Value> {
        let data: Vec<Value> = records.iter().map(SocialRecord::to_wire).collect();
        self.post_json("/analyze", &json!({ "data": data })).await
    }

    /// Report endpoints: `/generate-report`, `/generate_report`,
    /// `/export-html` and `/export-excel`.
    #[instrument(skip(self, body))]
    pub async fn post_report(&self, path: &str, body: &Value) -> Result<Value> {
        self.post_json(path, body).await
    }
}

#[async_trait]
impl BatchSubmitter for BackendClient {
    async fn submit(&self, batch: &[SocialRecord]) -> Result<Value> {
        self.analyze(batch).await
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[async_trait]
impl StatusProbe for BackendClient {
    async fn probe(&self) -> Result<()> {
        self.ping().await
    }
}
