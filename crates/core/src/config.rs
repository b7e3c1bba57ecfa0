use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub ingest: IngestConfig,
    pub store: StoreConfig,
    pub ranking: RankingConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub workers: usize,
    pub object_store_root: PathBuf,
    pub buckets: Vec<String>,
    pub bought_together_bucket: String,
    pub max_items_per_list: usize,
    pub max_concurrent_updates: usize,
    pub poll_interval_secs: u64,
}

/// Retry and timeout budget for key-value batch calls.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub max_batch_attempts: u32,
    pub retry_backoff_ms: u64,
    pub call_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RankingConfig {
    pub default_limit: usize,
    pub significance_floor: u64,
    pub default_currency: String,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub ingest_workers: Option<usize>,
    pub ingest_object_store_root: Option<PathBuf>,
    pub ingest_buckets: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://relatedrec.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            ingest: IngestConfig {
                workers: 10,
                object_store_root: PathBuf::from("data/buckets"),
                buckets: Vec::new(),
                bought_together_bucket: "ecomm-order-items".to_string(),
                max_items_per_list: 30,
                max_concurrent_updates: 10,
                poll_interval_secs: 5,
            },
            store: StoreConfig {
                max_batch_attempts: 8,
                retry_backoff_ms: 50,
                call_timeout_secs: 10,
            },
            ranking: RankingConfig {
                default_limit: 10,
                significance_floor: 10,
                default_currency: "USD".to_string(),
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl IngestConfig {
    pub fn is_bought_together_source(&self, bucket: &str) -> bool {
        bucket == self.bought_together_bucket
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("relatedrec.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(ingest) = patch.ingest {
            if let Some(workers) = ingest.workers {
                self.ingest.workers = workers;
            }
            if let Some(object_store_root) = ingest.object_store_root {
                self.ingest.object_store_root = object_store_root;
            }
            if let Some(buckets) = ingest.buckets {
                self.ingest.buckets = buckets;
            }
            if let Some(bought_together_bucket) = ingest.bought_together_bucket {
                self.ingest.bought_together_bucket = bought_together_bucket;
            }
            if let Some(max_items_per_list) = ingest.max_items_per_list {
                self.ingest.max_items_per_list = max_items_per_list;
            }
            if let Some(max_concurrent_updates) = ingest.max_concurrent_updates {
                self.ingest.max_concurrent_updates = max_concurrent_updates;
            }
            if let Some(poll_interval_secs) = ingest.poll_interval_secs {
                self.ingest.poll_interval_secs = poll_interval_secs;
            }
        }

        if let Some(store) = patch.store {
            if let Some(max_batch_attempts) = store.max_batch_attempts {
                self.store.max_batch_attempts = max_batch_attempts;
            }
            if let Some(retry_backoff_ms) = store.retry_backoff_ms {
                self.store.retry_backoff_ms = retry_backoff_ms;
            }
            if let Some(call_timeout_secs) = store.call_timeout_secs {
                self.store.call_timeout_secs = call_timeout_secs;
            }
        }

        if let Some(ranking) = patch.ranking {
            if let Some(default_limit) = ranking.default_limit {
                self.ranking.default_limit = default_limit;
            }
            if let Some(significance_floor) = ranking.significance_floor {
                self.ranking.significance_floor = significance_floor;
            }
            if let Some(default_currency) = ranking.default_currency {
                self.ranking.default_currency = default_currency;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("RELATEDREC_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("RELATEDREC_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("RELATEDREC_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("RELATEDREC_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("RELATEDREC_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("RELATEDREC_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("RELATEDREC_SERVER_PORT") {
            self.server.port = parse_env("RELATEDREC_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("RELATEDREC_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("RELATEDREC_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("RELATEDREC_INGEST_WORKERS") {
            self.ingest.workers = parse_env("RELATEDREC_INGEST_WORKERS", &value)?;
        }
        if let Some(value) = read_env("RELATEDREC_INGEST_OBJECT_STORE_ROOT") {
            self.ingest.object_store_root = PathBuf::from(value);
        }
        if let Some(value) = read_env("RELATEDREC_INGEST_BUCKETS") {
            self.ingest.buckets = split_list(&value);
        }
        if let Some(value) = read_env("RELATEDREC_INGEST_BOUGHT_TOGETHER_BUCKET") {
            self.ingest.bought_together_bucket = value;
        }
        if let Some(value) = read_env("RELATEDREC_INGEST_MAX_ITEMS_PER_LIST") {
            self.ingest.max_items_per_list =
                parse_env("RELATEDREC_INGEST_MAX_ITEMS_PER_LIST", &value)?;
        }
        if let Some(value) = read_env("RELATEDREC_INGEST_MAX_CONCURRENT_UPDATES") {
            self.ingest.max_concurrent_updates =
                parse_env("RELATEDREC_INGEST_MAX_CONCURRENT_UPDATES", &value)?;
        }
        if let Some(value) = read_env("RELATEDREC_INGEST_POLL_INTERVAL_SECS") {
            self.ingest.poll_interval_secs =
                parse_env("RELATEDREC_INGEST_POLL_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("RELATEDREC_STORE_MAX_BATCH_ATTEMPTS") {
            self.store.max_batch_attempts =
                parse_env("RELATEDREC_STORE_MAX_BATCH_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("RELATEDREC_STORE_RETRY_BACKOFF_MS") {
            self.store.retry_backoff_ms = parse_env("RELATEDREC_STORE_RETRY_BACKOFF_MS", &value)?;
        }
        if let Some(value) = read_env("RELATEDREC_STORE_CALL_TIMEOUT_SECS") {
            self.store.call_timeout_secs =
                parse_env("RELATEDREC_STORE_CALL_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("RELATEDREC_RANKING_DEFAULT_LIMIT") {
            self.ranking.default_limit = parse_env("RELATEDREC_RANKING_DEFAULT_LIMIT", &value)?;
        }
        if let Some(value) = read_env("RELATEDREC_RANKING_SIGNIFICANCE_FLOOR") {
            self.ranking.significance_floor =
                parse_env("RELATEDREC_RANKING_SIGNIFICANCE_FLOOR", &value)?;
        }
        if let Some(value) = read_env("RELATEDREC_RANKING_DEFAULT_CURRENCY") {
            self.ranking.default_currency = value;
        }

        let log_level =
            read_env("RELATEDREC_LOGGING_LEVEL").or_else(|| read_env("RELATEDREC_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("RELATEDREC_LOGGING_FORMAT").or_else(|| read_env("RELATEDREC_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(workers) = overrides.ingest_workers {
            self.ingest.workers = workers;
        }
        if let Some(root) = overrides.ingest_object_store_root {
            self.ingest.object_store_root = root;
        }
        if let Some(buckets) = overrides.ingest_buckets {
            self.ingest.buckets = buckets;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_ingest(&self.ingest)?;
        validate_store(&self.store)?;
        validate_ranking(&self.ranking)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("relatedrec.toml"), PathBuf::from("config/relatedrec.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_ingest(ingest: &IngestConfig) -> Result<(), ConfigError> {
    if ingest.workers == 0 {
        return Err(ConfigError::Validation(
            "ingest.workers must be greater than zero".to_string(),
        ));
    }
    if ingest.max_items_per_list == 0 {
        return Err(ConfigError::Validation(
            "ingest.max_items_per_list must be greater than zero".to_string(),
        ));
    }
    if ingest.max_concurrent_updates == 0 {
        return Err(ConfigError::Validation(
            "ingest.max_concurrent_updates must be greater than zero".to_string(),
        ));
    }
    if ingest.poll_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "ingest.poll_interval_secs must be greater than zero".to_string(),
        ));
    }
    if ingest.buckets.iter().any(|bucket| bucket.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "ingest.buckets must not contain empty bucket names".to_string(),
        ));
    }

    Ok(())
}

fn validate_store(store: &StoreConfig) -> Result<(), ConfigError> {
    if store.max_batch_attempts == 0 {
        return Err(ConfigError::Validation(
            "store.max_batch_attempts must be greater than zero".to_string(),
        ));
    }
    if store.call_timeout_secs == 0 || store.call_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "store.call_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_ranking(ranking: &RankingConfig) -> Result<(), ConfigError> {
    let currency = ranking.default_currency.trim();
    if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return Err(ConfigError::Validation(
            "ranking.default_currency must be a three-letter currency code such as `USD`"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    ingest: Option<IngestPatch>,
    store: Option<StorePatch>,
    ranking: Option<RankingPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct IngestPatch {
    workers: Option<usize>,
    object_store_root: Option<PathBuf>,
    buckets: Option<Vec<String>>,
    bought_together_bucket: Option<String>,
    max_items_per_list: Option<usize>,
    max_concurrent_updates: Option<usize>,
    poll_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct StorePatch {
    max_batch_attempts: Option<u32>,
    retry_backoff_ms: Option<u64>,
    call_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RankingPatch {
    default_limit: Option<usize>,
    significance_floor: Option<u64>,
    default_currency: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
