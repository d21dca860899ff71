use crate::infrastructure::error::InfraError;
use std::fs;
use std::path::Path;
use std::time::Duration;

const APP_JSON: &str = "app.json";
const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 15;
const DEFAULT_COOLDOWN_SECONDS: u64 = 30;
const DEFAULT_RECORDS_KEY: &str = "records";
const DEFAULT_USERS_KEY: &str = "users";
const DEFAULT_CONFIG_KEY: &str = "config";

const REMOTE_URL_KEYS: &[&str] = &["OVERTIME_REMOTE_URL"];
const POLL_INTERVAL_KEYS: &[&str] = &["OVERTIME_POLL_INTERVAL_SECONDS"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Empty means no remote tier; every remote call then degrades to offline.
    pub remote_base_url: String,
    pub poll_interval: Duration,
    pub rate_limit_cooldown: Duration,
    pub records_key: String,
    pub users_key: String,
    pub config_key: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            remote_base_url: String::new(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECONDS),
            rate_limit_cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECONDS),
            records_key: DEFAULT_RECORDS_KEY.to_string(),
            users_key: DEFAULT_USERS_KEY.to_string(),
            config_key: DEFAULT_CONFIG_KEY.to_string(),
        }
    }
}

fn default_app_json() -> serde_json::Value {
    serde_json::json!({
        "schema": 1,
        "remoteBaseUrl": "",
        "pollIntervalSeconds": DEFAULT_POLL_INTERVAL_SECONDS,
        "rateLimitCooldownSeconds": DEFAULT_COOLDOWN_SECONDS,
        "recordsKey": DEFAULT_RECORDS_KEY,
        "usersKey": DEFAULT_USERS_KEY,
        "configKey": DEFAULT_CONFIG_KEY
    })
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&default_app_json())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    load_app_config_with_lookup(config_dir, |key| std::env::var(key).ok())
}

pub fn load_app_config_with_lookup<F>(config_dir: &Path, lookup: F) -> Result<AppConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let app = read_config(&config_dir.join(APP_JSON))?;
    let defaults = AppConfig::default();

    let remote_base_url = optional_lookup_value(&lookup, REMOTE_URL_KEYS)
        .or_else(|| string_field(&app, "remoteBaseUrl"))
        .unwrap_or_default();
    if !remote_base_url.is_empty() {
        url::Url::parse(&remote_base_url).map_err(|error| {
            InfraError::InvalidConfig(format!("remoteBaseUrl is not a valid URL: {error}"))
        })?;
    }

    let poll_interval_seconds = match optional_lookup_value(&lookup, POLL_INTERVAL_KEYS) {
        Some(raw) => raw.parse::<u64>().map_err(|error| {
            InfraError::InvalidConfig(format!("invalid poll interval '{raw}': {error}"))
        })?,
        None => app
            .get("pollIntervalSeconds")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECONDS),
    };
    let cooldown_seconds = app
        .get("rateLimitCooldownSeconds")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(DEFAULT_COOLDOWN_SECONDS);

    Ok(AppConfig {
        remote_base_url,
        poll_interval: Duration::from_secs(poll_interval_seconds.max(1)),
        rate_limit_cooldown: Duration::from_secs(cooldown_seconds),
        records_key: string_field(&app, "recordsKey").unwrap_or(defaults.records_key),
        users_key: string_field(&app, "usersKey").unwrap_or(defaults.users_key),
        config_key: string_field(&app, "configKey").unwrap_or(defaults.config_key),
    })
}

fn string_field(value: &serde_json::Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}
