//! Runtime configuration: optional YAML file, then `IDPSCIM_*` environment overrides.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "IDPSCIM_CONFIG";
pub const SUPPORTED_SYNC_METHOD: &str = "groups";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("sync method {0:?} is not supported; only \"groups\" is")]
    UnsupportedSyncMethod(String),
    #[error("reading secret {name} from {path}: {source}")]
    SecretFile {
        name: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplyOrder {
    #[default]
    GroupsFirst,
    UsersFirst,
}

impl FromStr for ApplyOrder {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "groups-first" | "groups_first" => Ok(Self::GroupsFirst),
            "users-first" | "users_first" => Ok(Self::UsersFirst),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ApplyOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::GroupsFirst => "groups-first",
            Self::UsersFirst => "users-first",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    File,
    Http,
}

impl FromStr for StateBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "http" | "gcs" => Ok(Self::Http),
            _ => Err(()),
        }
    }
}

/// A credential given inline or as a path to a file holding it.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSource {
    #[serde(default, skip_serializing)]
    pub value: Option<String>,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl SecretSource {
    pub fn is_configured(&self) -> bool {
        self.value.as_deref().is_some_and(|v| !v.trim().is_empty()) || self.file.is_some()
    }
}

impl fmt::Debug for SecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretSource")
            .field("value", &self.value.as_ref().map(|_| "<redacted>"))
            .field("file", &self.file)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub directory_base_url: String,
    pub directory_customer: String,
    pub directory_token: SecretSource,
    pub scim_endpoint: String,
    pub scim_token: SecretSource,
    pub state_backend: StateBackend,
    /// Directory for the file backend, bucket name for the HTTP backend.
    pub state_bucket: String,
    pub state_key: String,
    pub state_endpoint: Option<String>,
    pub state_token: SecretSource,
    pub group_filters: Vec<String>,
    pub sync_method: String,
    pub apply_order: ApplyOrder,
    pub fetch_concurrency: usize,
    pub http_timeout_secs: u64,
    pub http_max_retries: usize,
    /// Zero disables the per-run deadline.
    pub run_timeout_secs: u64,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
    pub user_agent: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            directory_base_url: "https://admin.googleapis.com".to_string(),
            directory_customer: "my_customer".to_string(),
            directory_token: SecretSource::default(),
            scim_endpoint: String::new(),
            scim_token: SecretSource::default(),
            state_backend: StateBackend::File,
            state_bucket: "./state".to_string(),
            state_key: "idpscim/state.json".to_string(),
            state_endpoint: None,
            state_token: SecretSource::default(),
            group_filters: Vec::new(),
            sync_method: SUPPORTED_SYNC_METHOD.to_string(),
            apply_order: ApplyOrder::GroupsFirst,
            fetch_concurrency: 8,
            http_timeout_secs: 30,
            http_max_retries: 4,
            run_timeout_secs: 0,
            scheduler_enabled: false,
            sync_cron: "*/15 * * * *".to_string(),
            user_agent: format!("idpscim/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" | "TRUE" | "True" | "yes" => Some(true),
        "0" | "false" | "FALSE" | "False" | "no" | "" => Some(false),
        _ => None,
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

impl SyncConfig {
    /// Load the file named by `IDPSCIM_CONFIG` (if any), then apply environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load(path.as_deref())
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay settings from a key lookup; unset keys keep their current value.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("IDPSCIM_DIRECTORY_BASE_URL") {
            self.directory_base_url = v;
        }
        if let Some(v) = lookup("IDPSCIM_DIRECTORY_CUSTOMER") {
            self.directory_customer = v;
        }
        if let Some(v) = lookup("IDPSCIM_DIRECTORY_TOKEN") {
            self.directory_token.value = Some(v);
        }
        if let Some(v) = lookup("IDPSCIM_DIRECTORY_TOKEN_FILE") {
            self.directory_token.file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("IDPSCIM_SCIM_ENDPOINT") {
            self.scim_endpoint = v;
        }
        if let Some(v) = lookup("IDPSCIM_SCIM_TOKEN") {
            self.scim_token.value = Some(v);
        }
        if let Some(v) = lookup("IDPSCIM_SCIM_TOKEN_FILE") {
            self.scim_token.file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("IDPSCIM_STATE_BACKEND") {
            self.state_backend = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "IDPSCIM_STATE_BACKEND",
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("IDPSCIM_STATE_BUCKET") {
            self.state_bucket = v;
        }
        if let Some(v) = lookup("IDPSCIM_STATE_KEY") {
            self.state_key = v;
        }
        if let Some(v) = lookup("IDPSCIM_STATE_ENDPOINT") {
            self.state_endpoint = Some(v).filter(|v| !v.trim().is_empty());
        }
        if let Some(v) = lookup("IDPSCIM_STATE_TOKEN") {
            self.state_token.value = Some(v);
        }
        if let Some(v) = lookup("IDPSCIM_STATE_TOKEN_FILE") {
            self.state_token.file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("IDPSCIM_GROUP_FILTERS") {
            self.group_filters = v
                .split(';')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup("IDPSCIM_SYNC_METHOD") {
            self.sync_method = v;
        }
        if let Some(v) = lookup("IDPSCIM_APPLY_ORDER") {
            self.apply_order = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "IDPSCIM_APPLY_ORDER",
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("IDPSCIM_FETCH_CONCURRENCY") {
            self.fetch_concurrency = parse_value("IDPSCIM_FETCH_CONCURRENCY", v)?;
        }
        if let Some(v) = lookup("IDPSCIM_HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = parse_value("IDPSCIM_HTTP_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("IDPSCIM_HTTP_MAX_RETRIES") {
            self.http_max_retries = parse_value("IDPSCIM_HTTP_MAX_RETRIES", v)?;
        }
        if let Some(v) = lookup("IDPSCIM_RUN_TIMEOUT_SECS") {
            self.run_timeout_secs = parse_value("IDPSCIM_RUN_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("IDPSCIM_SCHEDULER_ENABLED") {
            self.scheduler_enabled = parse_bool(&v).ok_or(ConfigError::InvalidValue {
                key: "IDPSCIM_SCHEDULER_ENABLED",
                value: v,
            })?;
        }
        if let Some(v) = lookup("IDPSCIM_SYNC_CRON") {
            self.sync_cron = v;
        }
        if let Some(v) = lookup("IDPSCIM_USER_AGENT") {
            self.user_agent = v;
        }
        Ok(())
    }

    /// Reject configurations that cannot run, before any network I/O happens.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.sync_method.trim().eq_ignore_ascii_case(SUPPORTED_SYNC_METHOD) {
            return Err(ConfigError::UnsupportedSyncMethod(self.sync_method.clone()));
        }
        if self.directory_base_url.trim().is_empty() {
            return Err(ConfigError::Missing("directory_base_url"));
        }
        if !self.directory_token.is_configured() {
            return Err(ConfigError::Missing("directory_token"));
        }
        if self.scim_endpoint.trim().is_empty() {
            return Err(ConfigError::Missing("scim_endpoint"));
        }
        if !self.scim_token.is_configured() {
            return Err(ConfigError::Missing("scim_token"));
        }
        if self.state_bucket.trim().is_empty() {
            return Err(ConfigError::Missing("state_bucket"));
        }
        if self.state_key.trim().is_empty() {
            return Err(ConfigError::Missing("state_key"));
        }
        if self.state_backend == StateBackend::Http && self.state_endpoint.is_none() {
            return Err(ConfigError::Missing("state_endpoint"));
        }
        if self.fetch_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "fetch_concurrency",
                value: "0".to_string(),
            });
        }
        if self.scheduler_enabled && self.sync_cron.trim().is_empty() {
            return Err(ConfigError::Missing("sync_cron"));
        }
        Ok(())
    }
}
