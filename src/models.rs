use crate::frame::Frame;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Truncates a timestamp to 00:00:00 UTC of the same calendar day.
pub fn floor_to_midnight(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// One row of the provider's usage-details listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub subscription_guid: String,
    pub instance_id: String,
    pub usage_start: DateTime<Utc>,
    pub usage_end: DateTime<Utc>,
    pub pretax_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyEntry {
    pub day: DateTime<Utc>,
    pub resource_group: String,
    pub amount: f64,
}

/// Aggregated costs of one subscription over `[start, end)`, keyed by
/// lowercase resource group and then by day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionWindow {
    pub subscription_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub costs: BTreeMap<String, BTreeMap<DateTime<Utc>, DailyEntry>>,
}

impl SubscriptionWindow {
    pub fn new(subscription_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            subscription_id: subscription_id.to_string(),
            start,
            end,
            costs: BTreeMap::new(),
        }
    }

    /// Exact match on both bounds; partial overlap is a miss.
    pub fn covers_exactly(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start == start && self.end == end
    }

    pub fn contains_day(&self, day: DateTime<Utc>) -> bool {
        day >= self.start && day < self.end
    }

    /// Midnights from `start` (inclusive) to `end` (exclusive).
    pub fn days(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        std::iter::successors(Some(self.start), |day| Some(*day + Duration::days(1)))
            .take_while(move |day| *day < self.end)
    }

    pub fn resource_groups(&self) -> impl Iterator<Item = &str> {
        self.costs.keys().map(String::as_str)
    }

    pub fn amount(&self, resource_group: &str, day: DateTime<Utc>) -> Option<f64> {
        self.costs
            .get(resource_group)
            .and_then(|days| days.get(&day))
            .map(|entry| entry.amount)
    }

    pub fn day_total(&self, day: DateTime<Utc>) -> f64 {
        self.costs
            .values()
            .filter_map(|days| days.get(&day))
            .map(|entry| entry.amount)
            .sum()
    }
}

/// Output shape selected by the query's `rgSplit` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Split,
    Total,
}

impl OutputMode {
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag {
            Some("split") => OutputMode::Split,
            _ => OutputMode::Total,
        }
    }
}

/// Per-query payload. Fields the host adds on its own (`constant`,
/// `datasource`, `intervalMs`, ...) are tolerated and ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CostQuery {
    pub query_text: Option<String>,
    pub rg_split: Option<String>,
    pub ref_id: Option<String>,
    pub format: Option<String>,
}

impl CostQuery {
    pub fn output_mode(&self) -> OutputMode {
        OutputMode::from_flag(self.rg_split.as_deref())
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.query_text
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(rename = "From")]
    pub from: DateTime<Utc>,
    #[serde(rename = "To")]
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataQuery {
    #[serde(rename = "RefID")]
    pub ref_id: String,
    #[serde(rename = "JSON")]
    pub json: Value,
    #[serde(rename = "TimeRange")]
    pub time_range: TimeRange,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataSourceInstanceSettings {
    #[serde(rename = "JSONData", default)]
    pub json_data: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginContext {
    #[serde(rename = "DataSourceInstanceSettings", default)]
    pub data_source_instance_settings: DataSourceInstanceSettings,
}

impl PluginContext {
    pub fn with_json_data(json_data: Value) -> Self {
        Self {
            data_source_instance_settings: DataSourceInstanceSettings { json_data },
        }
    }

    pub fn json_data(&self) -> &Value {
        &self.data_source_instance_settings.json_data
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDataRequest {
    #[serde(rename = "PluginContext", default)]
    pub plugin_context: PluginContext,
    #[serde(rename = "Queries", default)]
    pub queries: Vec<DataQuery>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataResponse {
    #[serde(rename = "Frames")]
    pub frames: Vec<Frame>,
    #[serde(rename = "Error", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryDataResponse {
    #[serde(rename = "Responses")]
    pub responses: BTreeMap<String, DataResponse>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckHealthRequest {
    #[serde(rename = "PluginContext", default)]
    pub plugin_context: PluginContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckHealthResult {
    pub status: HealthStatus,
    pub message: String,
}
