use crate::error::AppError;
use crate::models::LineItem;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use tokio_util::sync::CancellationToken;

pub mod azure;
pub mod token;

#[cfg(test)]
mod test_server;

/// Where the query handler pulls raw billing line-items from.
#[async_trait]
pub trait CostSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetches every line-item of `subscription_id` whose usage starts in
    /// `[start, end)`. Order is not guaranteed.
    async fn fetch_line_items(
        &self,
        subscription_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<LineItem>, AppError>;
}

/// Races `fut` against cancellation of `cancel`.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        result = fut => result,
    }
}

pub(crate) fn truncate_body(body: &str) -> String {
    const LIMIT: usize = 512;
    match body.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
