use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use relatedrec_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec![
        "effective config (source precedence: override > env > file > default):".to_string(),
    ];
    for (key_path, value, env_key) in effective_values(&config) {
        let source =
            field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key_path, &value, source));
    }

    lines.join("\n")
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String, &'static str)> {
    vec![
        ("database.url", config.database.url.clone(), "RELATEDREC_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "RELATEDREC_DATABASE_MAX_CONNECTIONS",
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            "RELATEDREC_DATABASE_TIMEOUT_SECS",
        ),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            "RELATEDREC_SERVER_BIND_ADDRESS",
        ),
        ("server.port", config.server.port.to_string(), "RELATEDREC_SERVER_PORT"),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            "RELATEDREC_SERVER_GRACEFUL_SHUTDOWN_SECS",
        ),
        ("ingest.workers", config.ingest.workers.to_string(), "RELATEDREC_INGEST_WORKERS"),
        (
            "ingest.object_store_root",
            config.ingest.object_store_root.display().to_string(),
            "RELATEDREC_INGEST_OBJECT_STORE_ROOT",
        ),
        ("ingest.buckets", config.ingest.buckets.join(","), "RELATEDREC_INGEST_BUCKETS"),
        (
            "ingest.bought_together_bucket",
            config.ingest.bought_together_bucket.clone(),
            "RELATEDREC_INGEST_BOUGHT_TOGETHER_BUCKET",
        ),
        (
            "ingest.max_items_per_list",
            config.ingest.max_items_per_list.to_string(),
            "RELATEDREC_INGEST_MAX_ITEMS_PER_LIST",
        ),
        (
            "ingest.max_concurrent_updates",
            config.ingest.max_concurrent_updates.to_string(),
            "RELATEDREC_INGEST_MAX_CONCURRENT_UPDATES",
        ),
        (
            "ingest.poll_interval_secs",
            config.ingest.poll_interval_secs.to_string(),
            "RELATEDREC_INGEST_POLL_INTERVAL_SECS",
        ),
        (
            "store.max_batch_attempts",
            config.store.max_batch_attempts.to_string(),
            "RELATEDREC_STORE_MAX_BATCH_ATTEMPTS",
        ),
        (
            "store.retry_backoff_ms",
            config.store.retry_backoff_ms.to_string(),
            "RELATEDREC_STORE_RETRY_BACKOFF_MS",
        ),
        (
            "store.call_timeout_secs",
            config.store.call_timeout_secs.to_string(),
            "RELATEDREC_STORE_CALL_TIMEOUT_SECS",
        ),
        (
            "ranking.default_limit",
            config.ranking.default_limit.to_string(),
            "RELATEDREC_RANKING_DEFAULT_LIMIT",
        ),
        (
            "ranking.significance_floor",
            config.ranking.significance_floor.to_string(),
            "RELATEDREC_RANKING_SIGNIFICANCE_FLOOR",
        ),
        (
            "ranking.default_currency",
            config.ranking.default_currency.clone(),
            "RELATEDREC_RANKING_DEFAULT_CURRENCY",
        ),
        (
            "logging.level",
            config.logging.level.clone(),
            "RELATEDREC_LOGGING_LEVEL",
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            "RELATEDREC_LOGGING_FORMAT",
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("relatedrec.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/relatedrec.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    let legacy = legacy_env_key(env_key);
    if let Some(env_key) =
        std::iter::once(env_key).chain(legacy).find(|key| env::var_os(key).is_some())
    {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn legacy_env_key(env_key: &str) -> Option<&'static str> {
    match env_key {
        "RELATEDREC_LOGGING_LEVEL" => Some("RELATEDREC_LOG_LEVEL"),
        "RELATEDREC_LOGGING_FORMAT" => Some("RELATEDREC_LOG_FORMAT"),
        _ => None,
    }
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
