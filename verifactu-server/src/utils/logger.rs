//! Logging Infrastructure
//!
//! - Console output (pretty in development, JSON in production)
//! - Daily rotating application logs under `{log_dir}/app` (deleted after 14 days)
//! - Permanent chain-integrity logs under `{log_dir}/chain` (target `"chain"`, never deleted)

use std::fs;
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::Layered;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

/// Target of chain-integrity events (links, breaks, verifications)
pub const CHAIN_TARGET: &str = "chain";

/// Days application logs are kept
pub const APP_LOG_RETENTION_DAYS: i64 = 14;

type Base = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<Base> + Send + Sync>;

/// Initialize the logging system
///
/// # Arguments
/// * `level` - Log level (e.g., "info", "debug"), overridden by `RUST_LOG`
/// * `json_format` - JSON output for production
/// * `log_dir` - Optional directory for file logging
pub fn init_logger_with_file(
    level: &str,
    json_format: bool,
    log_dir: Option<&Path>,
) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let mut layers: Vec<BoxedLayer> = Vec::new();
    layers.push(if json_format {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    });

    if let Some(log_dir) = log_dir {
        let app_log_dir = log_dir.join("app");
        let chain_log_dir = log_dir.join(CHAIN_TARGET);
        fs::create_dir_all(&app_log_dir)?;
        fs::create_dir_all(&chain_log_dir)?;

        // Only log to app file if target is NOT "chain"
        let app_log = RollingFileAppender::new(Rotation::DAILY, app_log_dir, "app");
        layers.push(
            file_layer(app_log, json_format)
                .with_filter(tracing_subscriber::filter::filter_fn(|meta| {
                    meta.target() != CHAIN_TARGET
                }))
                .boxed(),
        );

        let chain_log = RollingFileAppender::new(Rotation::DAILY, chain_log_dir, CHAIN_TARGET);
        layers.push(
            file_layer(chain_log, json_format)
                .with_filter(tracing_subscriber::filter::filter_fn(|meta| {
                    meta.target() == CHAIN_TARGET
                }))
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))
}

fn file_layer(appender: RollingFileAppender, json_format: bool) -> BoxedLayer {
    let layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(appender));
    if json_format {
        layer.json().with_current_span(true).boxed()
    } else {
        layer.boxed()
    }
}

/// Delete `app-YYYY-MM-DD.log` files older than [`APP_LOG_RETENTION_DAYS`]
///
/// Chain logs are never touched. Returns the number of deleted files.
pub fn cleanup_old_logs(log_dir: &Path) -> anyhow::Result<usize> {
    let app_log_dir = log_dir.join("app");
    if !app_log_dir.exists() {
        return Ok(0);
    }

    let cutoff = chrono::Local::now().date_naive() - chrono::Duration::days(APP_LOG_RETENTION_DAYS);
    let mut deleted = 0;
    for entry in fs::read_dir(app_log_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        // rolling appender names files "app.YYYY-MM-DD"
        let date_part = name
            .strip_prefix("app.")
            .or_else(|| name.strip_prefix("app-"))
            .map(|d| d.trim_end_matches(".log"));
        if let Some(date_part) = date_part
            && let Ok(date) = chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
            && date < cutoff
        {
            fs::remove_file(&path)?;
            tracing::info!(file = %name, "Deleted old log file");
            deleted += 1;
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_keeps_recent_and_chain_logs() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app");
        let chain = dir.path().join(CHAIN_TARGET);
        fs::create_dir_all(&app).unwrap();
        fs::create_dir_all(&chain).unwrap();

        let today = chrono::Local::now().date_naive();
        let old = today - chrono::Duration::days(APP_LOG_RETENTION_DAYS + 5);
        fs::write(app.join(format!("app.{}", old.format("%Y-%m-%d"))), "x").unwrap();
        fs::write(app.join(format!("app.{}", today.format("%Y-%m-%d"))), "x").unwrap();
        fs::write(chain.join(format!("chain.{}", old.format("%Y-%m-%d"))), "x").unwrap();

        assert_eq!(cleanup_old_logs(dir.path()).unwrap(), 1);
        assert_eq!(fs::read_dir(&app).unwrap().count(), 1);
        assert_eq!(fs::read_dir(&chain).unwrap().count(), 1);
    }
}
