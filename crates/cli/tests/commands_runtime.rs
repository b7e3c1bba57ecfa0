use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use relatedrec_cli::commands::{config, import, ingest, migrate};
use serde_json::Value;
use tempfile::TempDir;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("RELATEDREC_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("RELATEDREC_DATABASE_URL", "postgres://localhost/db")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn ingest_folds_the_latest_run_into_the_database() {
    let dir = TempDir::new().expect("tempdir");
    let run = dir.path().join("buckets").join("ecomm-order-items").join("2016-05-01");
    fs::create_dir_all(&run).expect("run dir");
    fs::write(
        run.join("part-00000"),
        "(A,{\"productId\":\"A\",\"numOfPurchase\":2,\"boughtTogetherItems\":[{\"productId\":\"B\",\"totalScore\":3}]})\n\
         (B,{\"productId\":\"B\",\"numOfPurchase\":1})\n\
         (C,{broken)\n",
    )
    .expect("partition");
    fs::write(run.join("part-00000.crc"), "checksum").expect("crc");
    fs::write(run.join("_SUCCESS"), "").expect("sentinel");

    let database_url = sqlite_url(dir.path());
    let root = dir.path().join("buckets");
    let root = root.to_str().expect("utf8 path");
    with_env(
        &[
            ("RELATEDREC_DATABASE_URL", database_url.as_str()),
            ("RELATEDREC_INGEST_OBJECT_STORE_ROOT", root),
            ("RELATEDREC_LOG_LEVEL", "error"),
        ],
        || {
            let result = ingest::run("ecomm-order-items", None);
            assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "ingest");
            assert_eq!(payload["details"]["partitions"], 1);
            assert_eq!(payload["details"]["products"], 2);
            assert_eq!(payload["details"]["lines_skipped"], 1);
            assert_eq!(payload["details"]["records_written"], 2);
        },
    );
}

#[test]
fn ingest_reports_buckets_without_completed_runs() {
    let dir = TempDir::new().expect("tempdir");
    fs::create_dir_all(dir.path().join("buckets").join("views")).expect("bucket");
    let database_url = sqlite_url(dir.path());
    let root = dir.path().join("buckets");
    let root = root.to_str().expect("utf8 path");

    with_env(
        &[
            ("RELATEDREC_DATABASE_URL", database_url.as_str()),
            ("RELATEDREC_INGEST_OBJECT_STORE_ROOT", root),
        ],
        || {
            let result = ingest::run("views", None);
            assert_eq!(result.exit_code, 0);
            let payload = parse_payload(&result.output);
            assert!(payload["message"].as_str().expect("message").contains("no completed run"));
            assert!(payload.get("details").is_none());
        },
    );
}

#[test]
fn watch_requires_configured_buckets() {
    with_env(&[("RELATEDREC_DATABASE_URL", "sqlite::memory:")], || {
        let result = ingest::watch();
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "watch");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn import_catalog_upserts_json_lines() {
    let dir = TempDir::new().expect("tempdir");
    let file = dir.path().join("catalog.jsonl");
    fs::write(
        &file,
        "{\"productId\":\"A\",\"name\":\"Runner\",\"available\":true,\"similarItemIds\":[\"B\"]}\n\
         \n\
         {\"productId\":\"B\",\"name\":\"Trail\",\"prices\":{\"USD\":{\"listPrice\":\"50.00\",\"salePrice\":\"39.99\"}}}\n",
    )
    .expect("catalog file");
    let database_url = sqlite_url(dir.path());

    with_env(&[("RELATEDREC_DATABASE_URL", database_url.as_str())], || {
        let result = import::catalog(&file);
        assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "import-catalog");
        assert_eq!(payload["message"], "imported 2 catalog products");
    });
}

#[test]
fn import_catalog_rejects_malformed_lines() {
    let dir = TempDir::new().expect("tempdir");
    let file = dir.path().join("catalog.jsonl");
    fs::write(&file, "{\"productId\":\"A\"}\n{broken\n").expect("catalog file");

    with_env(&[("RELATEDREC_DATABASE_URL", "sqlite::memory:")], || {
        let result = import::catalog(&file);
        assert_eq!(result.exit_code, 8);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "invalid_input");
        assert!(payload["message"].as_str().expect("message").starts_with("line 2:"));
    });
}

#[test]
fn import_customers_upserts_json_lines() {
    let dir = TempDir::new().expect("tempdir");
    let file = dir.path().join("customers.jsonl");
    fs::write(&file, "{\"customerId\":\"c-1\",\"colorPrefs\":[\"red\",\"blue\"]}\n")
        .expect("customer file");
    let database_url = sqlite_url(dir.path());

    with_env(&[("RELATEDREC_DATABASE_URL", database_url.as_str())], || {
        let result = import::customers(&file);
        assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);
        assert_eq!(parse_payload(&result.output)["message"], "imported 1 customers");
    });
}

#[test]
fn config_reports_value_sources() {
    with_env(
        &[("RELATEDREC_INGEST_WORKERS", "4"), ("RELATEDREC_LOG_LEVEL", "debug")],
        || {
            let output = config::run();

            assert!(output.contains("- ingest.workers = 4 (source: env (RELATEDREC_INGEST_WORKERS))"));
            assert!(output.contains("- logging.level = debug (source: env (RELATEDREC_LOG_LEVEL))"));
            assert!(output.contains("- server.port = 8080 (source: default)"));
            assert!(output.contains("- ingest.bought_together_bucket = ecomm-order-items (source: default)"));
        },
    );
}

fn sqlite_url(dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", dir.join("relatedrec.db").display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "RELATEDREC_DATABASE_URL",
        "RELATEDREC_DATABASE_MAX_CONNECTIONS",
        "RELATEDREC_DATABASE_TIMEOUT_SECS",
        "RELATEDREC_SERVER_BIND_ADDRESS",
        "RELATEDREC_SERVER_PORT",
        "RELATEDREC_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "RELATEDREC_INGEST_WORKERS",
        "RELATEDREC_INGEST_OBJECT_STORE_ROOT",
        "RELATEDREC_INGEST_BUCKETS",
        "RELATEDREC_INGEST_BOUGHT_TOGETHER_BUCKET",
        "RELATEDREC_INGEST_MAX_ITEMS_PER_LIST",
        "RELATEDREC_INGEST_MAX_CONCURRENT_UPDATES",
        "RELATEDREC_INGEST_POLL_INTERVAL_SECS",
        "RELATEDREC_STORE_MAX_BATCH_ATTEMPTS",
        "RELATEDREC_STORE_RETRY_BACKOFF_MS",
        "RELATEDREC_STORE_CALL_TIMEOUT_SECS",
        "RELATEDREC_RANKING_DEFAULT_LIMIT",
        "RELATEDREC_RANKING_SIGNIFICANCE_FLOOR",
        "RELATEDREC_RANKING_DEFAULT_CURRENCY",
        "RELATEDREC_LOGGING_LEVEL",
        "RELATEDREC_LOGGING_FORMAT",
        "RELATEDREC_LOG_LEVEL",
        "RELATEDREC_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
