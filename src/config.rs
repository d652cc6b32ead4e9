use crate::error::AppError;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SERVICE_NAME: &str = "azure-costs";

const SECRET_ENTRY: &str = "datasource:client-secret";
const SECRET_ENV: &str = "AZURE_CLIENT_SECRET";
const ENV_PREFIX: &str = "AZURE_COSTS";

/// Datasource settings as the dashboard host hands them over (`JSONData`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(rename = "clientSecret")]
    pub client_secret: String,
    #[serde(rename = "tenantID")]
    pub tenant_id: String,
    /// Not consulted by the query path; queries carry their own subscription.
    #[serde(rename = "SubscriptionID")]
    pub subscription_id: String,
}

impl PluginConfig {
    pub fn from_json_value(raw: &Value) -> Result<Self, AppError> {
        if raw.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(raw.clone()).map_err(|e| AppError::ConfigDecode(e.to_string()))
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub default_subscription_id: String,
}

impl Credentials {
    pub fn from_config(cfg: &PluginConfig) -> Result<Self, AppError> {
        let required = [
            ("tenantID", &cfg.tenant_id),
            ("clientID", &cfg.client_id),
            ("clientSecret", &cfg.client_secret),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(AppError::Auth(format!(
                    "datasource setting '{key}' is empty"
                )));
            }
        }

        Ok(Self {
            tenant_id: cfg.tenant_id.trim().to_string(),
            client_id: cfg.client_id.trim().to_string(),
            client_secret: cfg.client_secret.clone(),
            default_subscription_id: cfg.subscription_id.trim().to_string(),
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("default_subscription_id", &self.default_subscription_id)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureEndpoints {
    pub authority: String,
    pub management: String,
    pub api_version: String,
}

impl Default for AzureEndpoints {
    fn default() -> Self {
        Self {
            authority: "https://login.microsoftonline.com".into(),
            management: "https://management.azure.com".into(),
            api_version: "2019-01-01".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub connect_timeout_seconds: u64,
    pub timeout_seconds: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: 10,
            timeout_seconds: 60,
        }
    }
}

/// Datasource section of the harness config file. Mirrors [`PluginConfig`]
/// with file-friendly key names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasourceSettings {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
    pub subscription_id: String,
}

impl DatasourceSettings {
    /// Renders the settings as the host-style `JSONData` object.
    pub fn to_json_data(&self, client_secret: Option<String>) -> Result<Value, AppError> {
        let cfg = PluginConfig {
            client_id: self.client_id.clone(),
            client_secret: client_secret.unwrap_or_else(|| self.client_secret.clone()),
            tenant_id: self.tenant_id.clone(),
            subscription_id: self.subscription_id.clone(),
        };
        Ok(serde_json::to_value(cfg)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: String,
    pub http: HttpSettings,
    pub endpoints: AzureEndpoints,
    pub datasource: DatasourceSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            http: HttpSettings::default(),
            endpoints: AzureEndpoints::default(),
            datasource: DatasourceSettings::default(),
        }
    }
}

fn app_home_dir() -> Result<PathBuf, AppError> {
    if let Ok(custom) = std::env::var("AZURE_COSTS_HOME") {
        return Ok(PathBuf::from(custom));
    }

    if let Some(dirs) = ProjectDirs::from("com", "azure-costs", SERVICE_NAME) {
        let candidate = dirs.data_local_dir().to_path_buf();
        if fs::create_dir_all(&candidate).is_ok() {
            return Ok(candidate);
        }
    }

    let cwd = std::env::current_dir()?;
    Ok(cwd.join(".azure-costs"))
}

pub fn config_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("config"))
}

pub fn config_path() -> Result<PathBuf, AppError> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn ensure_dirs() -> Result<(), AppError> {
    fs::create_dir_all(config_dir()?)?;
    Ok(())
}

pub fn load_config() -> Result<AppConfig, AppError> {
    load_config_from(&config_path()?)
}

/// Layers built-in defaults, the TOML file (if present) and
/// `AZURE_COSTS__*` environment variables, in that order.
pub fn load_config_from(path: &Path) -> Result<AppConfig, AppError> {
    let settings = config::Config::builder()
        .add_source(config::Config::try_from(&AppConfig::default())?)
        .add_source(
            config::File::from(path)
                .format(config::FileFormat::Toml)
                .required(false),
        )
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    ensure_dirs()?;
    let path = config_path()?;
    let raw = toml::to_string_pretty(config)?;
    fs::write(path, raw)?;
    Ok(())
}

pub fn ensure_initialized() -> Result<(), AppError> {
    ensure_dirs()?;
    let cfg_path = config_path()?;
    if !cfg_path.exists() {
        save_config(&AppConfig::default())?;
    }
    Ok(())
}

fn secret_entry() -> Result<keyring::Entry, AppError> {
    Ok(keyring::Entry::new(SERVICE_NAME, SECRET_ENTRY)?)
}

pub fn set_client_secret(secret: &str) -> Result<(), AppError> {
    store_client_secret(&secret_entry()?, secret)
}

fn store_client_secret(entry: &keyring::Entry, secret: &str) -> Result<(), AppError> {
    entry.set_password(secret)?;
    Ok(())
}

/// Looks for a client secret in the configured settings, then the keyring,
/// then the environment.
pub fn resolve_client_secret(settings: &DatasourceSettings) -> Option<String> {
    let entry = secret_entry()
        .map_err(|e| debug!(error = %e, "keyring unavailable"))
        .ok();
    resolve_client_secret_with(settings, entry.as_ref(), std::env::var(SECRET_ENV).ok())
}

fn resolve_client_secret_with(
    settings: &DatasourceSettings,
    entry: Option<&keyring::Entry>,
    env_secret: Option<String>,
) -> Option<String> {
    if !settings.client_secret.is_empty() {
        return Some(settings.client_secret.clone());
    }

    match entry.map(keyring::Entry::get_password) {
        Some(Ok(value)) if !value.is_empty() => return Some(value),
        Some(Err(keyring::Error::NoEntry)) | Some(Ok(_)) | None => {}
        Some(Err(e)) => debug!(error = %e, "reading client secret from keyring failed"),
    }

    env_secret.filter(|v| !v.is_empty())
}
