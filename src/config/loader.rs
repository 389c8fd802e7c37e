//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::BridgeConfig;
use crate::config::secret_string;
use crate::domain::errors::BridgeError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Performs environment variable substitution (${VAR} syntax)
/// 3. Parses the TOML into BridgeConfig
/// 4. Applies environment variable overrides (LABELBRIDGE_* prefix)
/// 5. Validates the configuration
///
/// # Errors
///
/// Returns `BridgeError::Configuration` if the file cannot be read, a
/// referenced variable is unset, parsing fails or validation fails.
///
/// # Examples
///
/// ```no_run
/// use labelbridge::config::loader::load_config;
///
/// let config = load_config("labelbridge.toml").expect("Failed to load config");
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<BridgeConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(BridgeError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        BridgeError::Configuration(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    parse_config(&contents)
}

/// Parses, overrides and validates configuration text
pub fn parse_config(contents: &str) -> Result<BridgeConfig> {
    let contents = substitute_env_vars(contents)?;

    let mut config: BridgeConfig = toml::from_str(&contents)
        .map_err(|e| BridgeError::Configuration(format!("Failed to parse TOML: {e}")))?;

    apply_env_overrides(&mut config)?;

    config.validate().map_err(|e| {
        BridgeError::Configuration(format!("Configuration validation failed: {e}"))
    })?;

    Ok(config)
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static placeholder regex"))
}

/// Substitutes environment variables in the format ${VAR_NAME}
///
/// Comment lines are copied untouched.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = placeholder_regex();
    let mut lines = Vec::new();
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            lines.push(line.to_string());
            continue;
        }

        let processed = re.replace_all(line, |cap: &regex::Captures<'_>| {
            let var_name = &cap[1];
            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    if !missing_vars.iter().any(|v| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                    String::new()
                }
            }
        });
        lines.push(processed.into_owned());
    }

    if !missing_vars.is_empty() {
        return Err(BridgeError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(lines.join("\n"))
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(val) => val.trim().parse().map(Some).map_err(|_| {
            BridgeError::Configuration(format!("Invalid value '{val}' for {name}"))
        }),
        Err(_) => Ok(None),
    }
}

/// Applies environment variable overrides using the LABELBRIDGE_* prefix
///
/// Variables follow the pattern `LABELBRIDGE_<SECTION>_<KEY>`, for example
/// `LABELBRIDGE_DELIVERY_WATCH_DIR` or `LABELBRIDGE_SELECTOR_BATCH_SIZE`.
/// List values (`LABELBRIDGE_SELECTOR_SITES`) are comma separated.
fn apply_env_overrides(config: &mut BridgeConfig) -> Result<()> {
    // Application overrides
    if let Ok(val) = std::env::var("LABELBRIDGE_APPLICATION_LOG_LEVEL") {
        config.application.log_level = val;
    }
    if let Some(val) = env_parse("LABELBRIDGE_APPLICATION_DRY_RUN")? {
        config.application.dry_run = val;
    }

    // Database overrides
    if let Ok(val) = std::env::var("LABELBRIDGE_DATABASE_CONNECTION_STRING") {
        config.database.connection_string = secret_string(val);
    }
    if let Some(val) = env_parse("LABELBRIDGE_DATABASE_MAX_CONNECTIONS")? {
        config.database.max_connections = val;
    }
    if let Some(val) = env_parse("LABELBRIDGE_DATABASE_STATEMENT_TIMEOUT_SECONDS")? {
        config.database.statement_timeout_seconds = val;
    }
    if let Ok(val) = std::env::var("LABELBRIDGE_DATABASE_SSL_MODE") {
        config.database.ssl_mode = val;
    }

    // Selector overrides
    if let Ok(val) = std::env::var("LABELBRIDGE_SELECTOR_SITES") {
        config.selector.sites = val
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(val) = env_parse("LABELBRIDGE_SELECTOR_BATCH_SIZE")? {
        config.selector.batch_size = val;
    }

    // Connector overrides
    if let Some(val) = env_parse("LABELBRIDGE_CONNECTOR_MAX_BATCHES_PER_RUN")? {
        config.connector.max_batches_per_run = val;
    }
    if let Some(val) = env_parse("LABELBRIDGE_CONNECTOR_ALLOW_PARTIAL_DELIVERY")? {
        config.connector.allow_partial_delivery = val;
    }

    // Delivery overrides
    if let Ok(val) = std::env::var("LABELBRIDGE_DELIVERY_WATCH_DIR") {
        config.delivery.watch_dir = PathBuf::from(val);
    }
    if let Ok(val) = std::env::var("LABELBRIDGE_DELIVERY_STAGING_DIR") {
        config.delivery.staging_dir = Some(PathBuf::from(val));
    }
    if let Some(val) = env_parse("LABELBRIDGE_DELIVERY_MAX_RETRIES")? {
        config.delivery.max_retries = val;
    }
    if let Some(val) = env_parse("LABELBRIDGE_DELIVERY_IO_TIMEOUT_SECONDS")? {
        config.delivery.io_timeout_seconds = val;
    }

    // Storage overrides
    if let Ok(val) = std::env::var("LABELBRIDGE_STORAGE_WORK_DIR") {
        config.storage.work_dir = PathBuf::from(val);
    }
    if let Ok(val) = std::env::var("LABELBRIDGE_STORAGE_ARCHIVE_DIR") {
        config.storage.archive_dir = PathBuf::from(val);
    }
    if let Ok(val) = std::env::var("LABELBRIDGE_STORAGE_QUARANTINE_DIR") {
        config.storage.quarantine_dir = PathBuf::from(val);
    }
    if let Ok(val) = std::env::var("LABELBRIDGE_STORAGE_AUDIT_DIR") {
        config.storage.audit_dir = PathBuf::from(val);
    }
    if let Some(val) = env_parse("LABELBRIDGE_STORAGE_RETENTION_DAYS")? {
        config.storage.retention_days = val;
    }

    // Logging overrides
    if let Some(val) = env_parse("LABELBRIDGE_LOGGING_LOCAL_ENABLED")? {
        config.logging.local_enabled = val;
    }
    if let Ok(val) = std::env::var("LABELBRIDGE_LOGGING_LOCAL_PATH") {
        config.logging.local_path = val;
    }

    Ok(())
}
