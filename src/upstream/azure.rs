use crate::config::{AzureEndpoints, Credentials, HttpSettings};
use crate::error::AppError;
use crate::models::LineItem;
use crate::upstream::token::TokenProvider;
use crate::upstream::{cancellable, truncate_body, CostSource};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Usage-details client for the Consumption API, legacy billing schema.
pub struct AzureCostClient {
    client: Client,
    tokens: TokenProvider,
    endpoints: AzureEndpoints,
}

#[derive(Debug, Deserialize)]
struct UsageDetailsPage {
    #[serde(default)]
    value: Vec<UsageDetail>,
    #[serde(rename = "nextLink", default)]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageDetail {
    properties: UsageProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageProperties {
    subscription_guid: String,
    instance_id: String,
    usage_start: String,
    usage_end: String,
    pretax_cost: f64,
}

#[derive(Debug)]
pub struct UsagePage {
    pub items: Vec<LineItem>,
    pub next_link: Option<String>,
}

impl AzureCostClient {
    pub fn new(
        credentials: Credentials,
        endpoints: AzureEndpoints,
        http: HttpSettings,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(http.connect_timeout_seconds))
            .timeout(Duration::from_secs(http.timeout_seconds))
            .build()
            .map_err(|e| AppError::Transport(format!("building HTTP client failed: {e}")))?;
        let tokens = TokenProvider::new(client.clone(), &endpoints, credentials)?;
        Ok(Self {
            client,
            tokens,
            endpoints,
        })
    }

    pub fn usage_url(
        &self,
        subscription_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Url, AppError> {
        let base = &self.endpoints.management;
        let mut url = Url::parse(base)
            .map_err(|e| AppError::Config(format!("invalid management URL '{base}': {e}")))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config(format!("management URL '{base}' cannot be a base")))?
            .pop_if_empty()
            .extend([
                "subscriptions",
                subscription_id,
                "providers",
                "Microsoft.Consumption",
                "usageDetails",
            ]);

        let filter = format!(
            "properties/usageStart ge '{}' and properties/usageStart lt '{}'",
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        );
        url.query_pairs_mut()
            .append_pair("api-version", &self.endpoints.api_version)
            .append_pair("$filter", &filter);
        Ok(url)
    }

    /// Rejects a `nextLink` that would carry the bearer token to a host other
    /// than the management endpoint.
    fn check_next_link(&self, link: &str) -> Result<(), AppError> {
        let base = &self.endpoints.management;
        let management = Url::parse(base)
            .map_err(|e| AppError::Config(format!("invalid management URL '{base}': {e}")))?;
        let next = Url::parse(link)
            .map_err(|e| AppError::Protocol(format!("invalid nextLink '{link}': {e}")))?;

        if next.origin() != management.origin() {
            return Err(AppError::Protocol(format!(
                "nextLink points at {}, outside the management endpoint",
                next.origin().ascii_serialization()
            )));
        }
        Ok(())
    }

    /// Fetches one page, refreshing the token once on 401.
    async fn get_page(&self, url: &str, cancel: &CancellationToken) -> Result<UsagePage, AppError> {
        let mut refreshed = false;
        loop {
            let token = cancellable(cancel, self.tokens.token()).await?;

            let response = cancellable(cancel, async {
                self.client
                    .get(url)
                    .bearer_auth(&token)
                    .send()
                    .await
                    .map_err(|e| AppError::Transport(format!("usage request failed: {e}")))
            })
            .await?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                if refreshed {
                    return Err(AppError::Auth(
                        "usage endpoint rejected a freshly issued token".into(),
                    ));
                }
                warn!("usage request unauthorized, refreshing access token");
                self.tokens.invalidate(&token).await;
                refreshed = true;
                continue;
            }

            let body = cancellable(cancel, async move {
                response
                    .text()
                    .await
                    .map_err(|e| AppError::Transport(format!("reading usage response failed: {e}")))
            })
            .await?;

            if !status.is_success() {
                return Err(AppError::Transport(format!(
                    "usage endpoint returned HTTP {status}: {}",
                    truncate_body(&body)
                )));
            }

            return parse_usage_page(&body);
        }
    }
}

#[async_trait]
impl CostSource for AzureCostClient {
    fn name(&self) -> &'static str {
        "azure"
    }

    async fn fetch_line_items(
        &self,
        subscription_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<LineItem>, AppError> {
        let mut next = Some(self.usage_url(subscription_id, start, end)?.to_string());
        let mut visited = HashSet::new();
        let mut items = Vec::new();
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            if !visited.insert(url.clone()) {
                return Err(AppError::Protocol(format!(
                    "pagination revisited {url}"
                )));
            }

            let page = self.get_page(&url, cancel).await?;
            pages += 1;
            debug!(subscription_id, page = pages, items = page.items.len(), "fetched usage page");

            items.extend(page.items);
            next = page.next_link.filter(|link| !link.is_empty());
            if let Some(link) = &next {
                self.check_next_link(link)?;
            }
        }

        info!(subscription_id, pages, items = items.len(), "fetched usage details");
        Ok(items)
    }
}

pub fn parse_usage_page(body: &str) -> Result<UsagePage, AppError> {
    let page: UsageDetailsPage = serde_json::from_str(body)
        .map_err(|e| AppError::Protocol(format!("malformed usage details: {e}")))?;

    let items = page
        .value
        .into_iter()
        .map(|detail| detail.properties.into_line_item())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(UsagePage {
        items,
        next_link: page.next_link,
    })
}

impl UsageProperties {
    fn into_line_item(self) -> Result<LineItem, AppError> {
        let usage_start = parse_timestamp(&self.usage_start).ok_or_else(|| {
            AppError::Protocol(format!("unparseable usageStart '{}'", self.usage_start))
        })?;
        let usage_end = parse_timestamp(&self.usage_end).ok_or_else(|| {
            AppError::Protocol(format!("unparseable usageEnd '{}'", self.usage_end))
        })?;

        Ok(LineItem {
            subscription_guid: self.subscription_guid,
            instance_id: self.instance_id,
            usage_start,
            usage_end,
            pretax_cost: self.pretax_cost,
        })
    }
}

/// Accepts RFC 3339, offset-less ISO 8601 (read as UTC) and bare dates.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
