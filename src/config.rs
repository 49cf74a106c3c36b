use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;

/// Runtime configuration, read once at startup from the environment
/// (with `.env` support via dotenv). Every knob has a default so the
/// server runs with no configuration at all.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    /// Root under which room files, bundles and the default database live.
    pub data_dir: PathBuf,
    /// How long a room lives after creation. Not extended by activity.
    pub retention: time::Duration,
    /// Cadence of the expiry sweeper.
    pub sweep_interval: std::time::Duration,
    /// Per-file upload ceiling in bytes.
    pub max_file_bytes: u64,
    /// Total request-body ceiling for one upload batch. Requests above
    /// it are refused while the multipart stream is read, before any
    /// file is stored. Defaults to eight per-file ceilings.
    pub max_batch_bytes: u64,
    /// CORS allow-list; empty means any origin, without credentials.
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let data_dir = PathBuf::from(var_or("DATA_DIR", "data"));
        let database_url = dotenv::var("DATABASE_URL").unwrap_or_else(|_| {
            format!(
                "sqlite://{}?mode=rwc",
                data_dir.join("roomdrop.db").display()
            )
        });
        let max_file_bytes: u64 = var_or("MAX_FILE_BYTES", "52428800")
            .parse()
            .context("invalid MAX_FILE_BYTES")?;

        Ok(Self {
            bind_addr: var_or("BIND_ADDR", "0.0.0.0:8080")
                .parse()
                .context("invalid BIND_ADDR")?,
            database_url,
            retention: time::Duration::hours(
                var_or("RETENTION_HOURS", "24")
                    .parse()
                    .context("invalid RETENTION_HOURS")?,
            ),
            sweep_interval: std::time::Duration::from_secs(
                var_or("SWEEP_INTERVAL_SECS", "3600")
                    .parse()
                    .context("invalid SWEEP_INTERVAL_SECS")?,
            ),
            max_file_bytes,
            max_batch_bytes: match dotenv::var("MAX_BATCH_BYTES") {
                Ok(value) => value.parse().context("invalid MAX_BATCH_BYTES")?,
                Err(_) => max_file_bytes.saturating_mul(8),
            },
            allowed_origins: dotenv::var("ALLOWED_ORIGINS")
                .map(|list| {
                    list.split(',')
                        .map(|origin| origin.trim().to_owned())
                        .filter(|origin| !origin.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            data_dir,
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    dotenv::var(key).unwrap_or_else(|_| default.to_owned())
}
