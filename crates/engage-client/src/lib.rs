//! HTTP delivery of merged activity payloads to the ingest API.

use std::time::Duration;

use async_trait::async_trait;
use engage_core::{ActivityPayload, DeliveryError, EngageSettings};
use engage_pipeline::{DeliverySink, QualificationResult};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, instrument};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment variable holding the ingest API key.
pub const API_KEY_ENV: &str = "ENGAGE_API_KEY";

/// Read the API key from [`API_KEY_ENV`]; unset or empty means none.
pub fn api_key_from_env() -> Option<SecretString> {
    std::env::var(API_KEY_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .map(SecretString::from)
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid api host {host:?}: {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

#[derive(Debug)]
pub struct HttpSinkConfig {
    pub api_host: String,
    /// Whole-request timeout.
    pub timeout: Duration,
    pub api_key: Option<SecretString>,
}

impl HttpSinkConfig {
    pub fn from_settings(settings: &EngageSettings, api_key: Option<SecretString>) -> Self {
        Self {
            api_host: settings.api_host.clone(),
            timeout: settings.request_timeout(),
            api_key,
        }
    }
}

pub struct HttpDeliverySink {
    client: Client,
    base: Url,
    timeout: Duration,
    api_key: Option<SecretString>,
}

impl HttpDeliverySink {
    pub fn new(config: HttpSinkConfig) -> Result<Self, ClientError> {
        let invalid = |reason: String| ClientError::InvalidHost {
            host: config.api_host.clone(),
            reason,
        };
        let base = Url::parse(&config.api_host).map_err(|e| invalid(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(invalid("not a base URL".into()));
        }

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.timeout)
            .user_agent(concat!("engage/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base,
            timeout: config.timeout,
            api_key: config.api_key,
        })
    }

    /// `{api_host}/v1/accounts/{account}/users/{user}/activity`, with each
    /// id percent-encoded as a single path segment.
    pub fn activity_url(&self, account_id: &str, user_id: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            let _ = segments.pop_if_empty().extend([
                "v1",
                "accounts",
                account_id,
                "users",
                user_id,
                "activity",
            ]);
        }
        url
    }

    fn classify(&self, e: reqwest::Error) -> DeliveryError {
        if e.is_timeout() {
            DeliveryError::Timeout(self.timeout)
        } else if e.is_decode() || e.is_body() {
            DeliveryError::Serialization(e.to_string())
        } else {
            DeliveryError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl DeliverySink for HttpDeliverySink {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip_all, fields(user_id = %payload.user_id, events = payload.event_count()))]
    async fn deliver(&self, payload: &ActivityPayload) -> Result<QualificationResult, DeliveryError> {
        let url = self.activity_url(&payload.account_id, &payload.user_id);
        let mut req = self
            .client
            .post(url)
            .header("accept", "application/json")
            .json(&payload.to_wire());
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key.expose_secret());
        }

        let response = req.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.map_err(|e| self.classify(e))?;

        if !status.is_success() {
            debug!(status = status.as_u16(), "activity rejected");
            return Err(match DeliveryError::from_status(status.as_u16(), body) {
                DeliveryError::RateLimited { .. } => DeliveryError::RateLimited { retry_after },
                other => other,
            });
        }

        debug!(status = status.as_u16(), bytes = body.len(), "activity accepted");
        Ok(QualificationResult::new(parse_body(&body)))
    }
}

/// Empty bodies read as `null`; bodies that are not JSON are kept as a string.
fn parse_body(body: &str) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}
