use crate::aggregate::aggregate;
use crate::cache::WindowCache;
use crate::config::{AzureEndpoints, Credentials, HttpSettings, PluginConfig};
use crate::error::AppError;
use crate::frame::build_frame;
use crate::models::{
    floor_to_midnight, CheckHealthRequest, CheckHealthResult, CostQuery, DataQuery, DataResponse,
    HealthStatus, QueryDataRequest, QueryDataResponse, SubscriptionWindow,
};
use crate::upstream::azure::AzureCostClient;
use crate::upstream::{cancellable, CostSource};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Health result for settings that could not be decoded.
pub fn unhealthy(err: &AppError) -> CheckHealthResult {
    warn!(error = %err, "health check failed");
    CheckHealthResult {
        status: HealthStatus::Error,
        message: format!("Unable to parse datasource settings: {err}"),
    }
}

type SourceBuilder = dyn Fn(Credentials) -> Result<Arc<dyn CostSource>, AppError> + Send + Sync;

/// Answers `QueryData` and `CheckHealth` for one datasource instance.
pub struct CostQueryService {
    cache: Arc<WindowCache>,
    source: OnceCell<Arc<dyn CostSource>>,
    build_source: Box<SourceBuilder>,
}

impl CostQueryService {
    pub fn new(cache: Arc<WindowCache>, endpoints: AzureEndpoints, http: HttpSettings) -> Self {
        Self::with_source_builder(cache, move |credentials| {
            let client = AzureCostClient::new(credentials, endpoints.clone(), http)?;
            Ok(Arc::new(client) as Arc<dyn CostSource>)
        })
    }

    /// Uses `build` instead of the Azure client. It runs once, with the
    /// credentials of the first query that needs the upstream.
    pub fn with_source_builder<F>(cache: Arc<WindowCache>, build: F) -> Self
    where
        F: Fn(Credentials) -> Result<Arc<dyn CostSource>, AppError> + Send + Sync + 'static,
    {
        Self {
            cache,
            source: OnceCell::new(),
            build_source: Box::new(build),
        }
    }

    pub fn cache(&self) -> &Arc<WindowCache> {
        &self.cache
    }

    pub fn check_health(&self, req: &CheckHealthRequest) -> CheckHealthResult {
        match PluginConfig::from_json_value(req.plugin_context.json_data()) {
            Ok(_) => CheckHealthResult {
                status: HealthStatus::Ok,
                message: "Data source is working".into(),
            },
            Err(err) => unhealthy(&err),
        }
    }

    /// Runs the batch in order. The first failing query fails the batch.
    pub async fn query_data(
        &self,
        req: &QueryDataRequest,
        cancel: &CancellationToken,
    ) -> Result<QueryDataResponse, AppError> {
        let config = PluginConfig::from_json_value(req.plugin_context.json_data())?;

        let mut response = QueryDataResponse::default();
        for query in &req.queries {
            match self.query(&config, query, cancel).await {
                Ok(result) => {
                    response.responses.insert(query.ref_id.clone(), result);
                }
                Err(err) => {
                    error!(ref_id = %query.ref_id, error = %err, "query failed");
                    return Err(err);
                }
            }
        }

        Ok(response)
    }

    async fn query(
        &self,
        config: &PluginConfig,
        query: &DataQuery,
        cancel: &CancellationToken,
    ) -> Result<DataResponse, AppError> {
        let cost_query: CostQuery = serde_json::from_value(query.json.clone())
            .map_err(|e| AppError::query_decode(&query.ref_id, e.to_string()))?;

        if cost_query.format.as_deref().unwrap_or_default().is_empty() {
            warn!(ref_id = %query.ref_id, "format is empty, defaulting to time series");
        }

        let subscription_id = cost_query
            .subscription_id()
            .ok_or_else(|| {
                AppError::query_decode(&query.ref_id, "queryText must name a subscription")
            })?
            .to_string();

        let start = floor_to_midnight(query.time_range.from);
        let end = floor_to_midnight(query.time_range.to);
        if end < start {
            return Err(AppError::query_decode(
                &query.ref_id,
                format!("time range ends ({end}) before it starts ({start})"),
            ));
        }

        let window = self
            .window_for(config, &subscription_id, start, end, cancel)
            .await
            .map_err(|source| AppError::Fetch {
                subscription_id: subscription_id.clone(),
                start,
                end,
                source: Box::new(source),
            })?;

        Ok(DataResponse {
            frames: vec![build_frame(&window, cost_query.output_mode())],
            error: None,
        })
    }

    fn cached_window(
        &self,
        subscription_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<Arc<SubscriptionWindow>> {
        self.cache
            .lookup(subscription_id)
            .filter(|window| window.covers_exactly(start, end))
    }

    async fn window_for(
        &self,
        config: &PluginConfig,
        subscription_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Arc<SubscriptionWindow>, AppError> {
        if let Some(window) = self.cached_window(subscription_id, start, end) {
            debug!(subscription_id, "cache hit");
            return Ok(window);
        }

        let lock = self.cache.fetch_lock(subscription_id);
        let _guard = cancellable(cancel, async move { Ok(lock.lock_owned().await) }).await?;

        // Another caller may have filled the cache while we waited.
        if let Some(window) = self.cached_window(subscription_id, start, end) {
            debug!(subscription_id, "cache filled by concurrent fetch");
            return Ok(window);
        }

        debug!(subscription_id, "cache miss, fetching usage details");
        let source = self.source(config).await?;
        let items = source
            .fetch_line_items(subscription_id, start, end, cancel)
            .await?;

        let window = aggregate(subscription_id, start, end, items);
        let resource_groups = window.costs.len();
        let window = self.cache.store(subscription_id, window);
        info!(
            subscription_id,
            source = source.name(),
            resource_groups,
            cached_windows = self.cache.len(),
            "cached subscription window"
        );
        Ok(window)
    }

    async fn source(&self, config: &PluginConfig) -> Result<&Arc<dyn CostSource>, AppError> {
        self.source
            .get_or_try_init(|| async {
                let credentials = Credentials::from_config(config)?;
                (self.build_source)(credentials)
            })
            .await
    }
}
