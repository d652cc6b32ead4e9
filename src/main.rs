use azure_costs::cache::WindowCache;
use azure_costs::config::{
    config_path, ensure_initialized, load_config, resolve_client_secret, set_client_secret,
    AppConfig,
};
use azure_costs::error::AppError;
use azure_costs::models::{
    CheckHealthRequest, DataQuery, PluginContext, QueryDataRequest, TimeRange,
};
use azure_costs::service::{self, CostQueryService};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "azure-costs")]
#[command(about = "Azure daily cost queries for dashboard time series")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init,
    SetSecret {
        #[arg(long)]
        secret: String,
    },
    Health {
        /// Raw datasource settings JSON; defaults to the configured datasource.
        #[arg(long)]
        json_data: Option<String>,
    },
    Query {
        #[arg(long)]
        subscription: Option<String>,
        /// Raw per-query JSON, used instead of --subscription/--split/--format.
        #[arg(long)]
        query_json: Option<String>,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        split: bool,
        #[arg(long, default_value = "A")]
        ref_id: String,
        #[arg(long, default_value = "time_series")]
        format: String,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn parse_instant(input: &str) -> Result<DateTime<Utc>, AppError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            AppError::Config(format!(
                "Invalid timestamp '{input}'. Use RFC 3339 or YYYY-MM-DD."
            ))
        })
}

fn build_query_json(
    subscription: Option<&str>,
    query_json: Option<&str>,
    split: bool,
    ref_id: &str,
    format: &str,
) -> Result<Value, AppError> {
    if let Some(raw) = query_json {
        return serde_json::from_str(raw).map_err(|e| AppError::query_decode(ref_id, e.to_string()));
    }

    let Some(subscription) = subscription else {
        return Err(AppError::Config(
            "Provide --subscription or --query-json.".into(),
        ));
    };

    Ok(json!({
        "refId": ref_id,
        "queryText": subscription,
        "rgSplit": if split { "split" } else { "" },
        "format": format,
    }))
}

fn datasource_json(cfg: &AppConfig, raw: Option<&str>) -> Result<Value, AppError> {
    match raw {
        Some(raw) => serde_json::from_str(raw).map_err(|e| AppError::ConfigDecode(e.to_string())),
        None => cfg
            .datasource
            .to_json_data(resolve_client_secret(&cfg.datasource)),
    }
}

fn service_for(cfg: &AppConfig) -> CostQueryService {
    CostQueryService::new(
        Arc::new(WindowCache::new()),
        cfg.endpoints.clone(),
        cfg.http,
    )
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            ensure_initialized()?;
            println!("Initialized azure-costs config at {}.", config_path()?.display());
        }
        Commands::SetSecret { secret } => {
            set_client_secret(&secret)?;
            println!("Client secret stored in the system keyring.");
        }
        Commands::Health { json_data } => {
            let cfg = load_config()?;
            init_tracing(&cfg.log_level);

            let result = match datasource_json(&cfg, json_data.as_deref()) {
                Ok(json_data) => service_for(&cfg).check_health(&CheckHealthRequest {
                    plugin_context: PluginContext::with_json_data(json_data),
                }),
                Err(err) => service::unhealthy(&err),
            };
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Query {
            subscription,
            query_json,
            from,
            to,
            split,
            ref_id,
            format,
        } => {
            let cfg = load_config()?;
            init_tracing(&cfg.log_level);

            let time_range = TimeRange {
                from: parse_instant(&from)?,
                to: parse_instant(&to)?,
            };
            let json = build_query_json(
                subscription.as_deref(),
                query_json.as_deref(),
                split,
                &ref_id,
                &format,
            )?;
            let request = QueryDataRequest {
                plugin_context: PluginContext::with_json_data(datasource_json(&cfg, None)?),
                queries: vec![DataQuery {
                    ref_id,
                    json,
                    time_range,
                }],
            };

            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    trigger.cancel();
                }
            });

            let response = service_for(&cfg).query_data(&request, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_instant_accepts_rfc3339_and_dates() {
        assert_eq!(
            parse_instant("2024-01-01T10:30:00Z").unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap()
        );
        assert_eq!(
            parse_instant("2024-01-01T10:30:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 8, 30, 0).unwrap()
        );
        assert_eq!(
            parse_instant("2024-01-04").unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn parse_instant_rejects_unknown_formats() {
        let err = parse_instant("last week").expect_err("expected validation error");
        assert!(err.to_string().contains("Invalid timestamp"));
    }

    #[test]
    fn build_query_json_from_flags() {
        let json = build_query_json(Some("sub-1"), None, true, "A", "time_series").unwrap();
        assert_eq!(json["queryText"], "sub-1");
        assert_eq!(json["rgSplit"], "split");
        assert_eq!(json["refId"], "A");

        let json = build_query_json(Some("sub-1"), None, false, "A", "").unwrap();
        assert_eq!(json["rgSplit"], "");
    }

    #[test]
    fn build_query_json_prefers_raw_payload() {
        let json =
            build_query_json(Some("ignored"), Some(r#"{"queryText":"raw"}"#), true, "A", "")
                .unwrap();
        assert_eq!(json["queryText"], "raw");

        let err = build_query_json(None, Some("{oops"), false, "B", "").expect_err("bad json");
        assert!(matches!(err, AppError::QueryDecode { ref ref_id, .. } if ref_id == "B"));
    }

    #[test]
    fn build_query_json_requires_a_subscription_source() {
        let err = build_query_json(None, None, false, "A", "").expect_err("nothing to query");
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn datasource_json_decodes_raw_settings() {
        let cfg = AppConfig::default();
        let raw = datasource_json(&cfg, Some(r#"{"tenantID":"t"}"#)).unwrap();
        assert_eq!(raw["tenantID"], "t");

        let err = datasource_json(&cfg, Some("{not json")).expect_err("bad settings");
        assert!(matches!(err, AppError::ConfigDecode(_)));
    }
}
