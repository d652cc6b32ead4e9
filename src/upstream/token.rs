//! OAuth2 client-credentials tokens for the management API.

use crate::config::{AzureEndpoints, Credentials};
use crate::error::AppError;
use crate::upstream::truncate_body;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

/// Tokens are considered expired this long before the issuer says so.
const EXPIRY_SKEW: Duration = Duration::from_secs(60);
const DEFAULT_LIFETIME_SECS: u64 = 3599;

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + EXPIRY_SKEW < self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<Value>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

pub struct TokenProvider {
    client: Client,
    token_url: Url,
    scope: String,
    credentials: Credentials,
    cached: Mutex<Option<AccessToken>>,
}

impl TokenProvider {
    pub fn new(
        client: Client,
        endpoints: &AzureEndpoints,
        credentials: Credentials,
    ) -> Result<Self, AppError> {
        Ok(Self {
            client,
            token_url: Self::token_url(&endpoints.authority, &credentials.tenant_id)?,
            scope: format!("{}/.default", endpoints.management.trim_end_matches('/')),
            credentials,
            cached: Mutex::new(None),
        })
    }

    fn token_url(authority: &str, tenant_id: &str) -> Result<Url, AppError> {
        let mut url = Url::parse(authority)
            .map_err(|e| AppError::Config(format!("invalid authority URL '{authority}': {e}")))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config(format!("authority URL '{authority}' cannot be a base")))?
            .pop_if_empty()
            .extend([tenant_id, "oauth2", "v2.0", "token"]);
        Ok(url)
    }

    /// Returns a cached token while fresh, otherwise requests a new one.
    /// Concurrent callers wait on the same lock, so at most one request is
    /// in flight.
    pub async fn token(&self) -> Result<String, AppError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Instant::now())) {
            return Ok(token.value.clone());
        }

        let token = self.request_token().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// Drops the cached token if it is still `stale`. A token already
    /// replaced by another caller is kept.
    pub async fn invalidate(&self, stale: &str) {
        let mut cached = self.cached.lock().await;
        if cached.as_ref().is_some_and(|t| t.value == stale) {
            debug!("discarding rejected access token");
            *cached = None;
        }
    }

    async fn request_token(&self) -> Result<AccessToken, AppError> {
        debug!(tenant_id = %self.credentials.tenant_id, "requesting access token");

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        let response = self
            .client
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::Auth(format!("token request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Auth(format!("reading token response failed: {e}")))?;

        if !status.is_success() {
            warn!(%status, "token endpoint rejected client credentials");
            return Err(AppError::Auth(format!(
                "token endpoint returned HTTP {status}: {}",
                describe_token_error(&body)
            )));
        }

        parse_token_response(&body, Instant::now())
    }
}

fn parse_token_response(body: &str, now: Instant) -> Result<AccessToken, AppError> {
    let parsed: TokenResponse = serde_json::from_str(body)
        .map_err(|e| AppError::Auth(format!("malformed token response: {e}")))?;

    if parsed.access_token.is_empty() {
        return Err(AppError::Auth("token response carried an empty access_token".into()));
    }

    // v1 endpoints send expires_in as a string.
    let lifetime = match parsed.expires_in {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
    .unwrap_or(DEFAULT_LIFETIME_SECS);

    let expires_at = now
        .checked_add(Duration::from_secs(lifetime))
        .ok_or_else(|| AppError::Auth(format!("token lifetime of {lifetime}s is out of range")))?;

    Ok(AccessToken {
        value: parsed.access_token,
        expires_at,
    })
}

fn describe_token_error(body: &str) -> String {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(TokenErrorResponse {
            error_description: Some(description),
            ..
        }) => description,
        Ok(TokenErrorResponse {
            error: Some(error), ..
        }) => error,
        _ => truncate_body(body),
    }
}
