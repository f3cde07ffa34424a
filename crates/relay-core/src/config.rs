use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed configuration for the relay bot.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    pub gateway_url: String,
    pub gateway_api_key: Option<String>,

    // Storage
    pub download_dir: PathBuf,
    pub store_file: PathBuf,
    pub status_ledger_file: PathBuf,

    // Quota
    pub daily_quota: u32,

    // Pipeline tunables
    pub relay: RelayTuning,
}

/// Knobs the relay pipeline reads at runtime.
///
/// Kept separate from [`Config`] so the pipeline can be driven without an
/// environment (tests, embedding).
#[derive(Clone, Debug)]
pub struct RelayTuning {
    /// Pause between two ids of one batch.
    pub item_delay: Duration,
    /// Show per-item errors verbatim to the requester (otherwise suppressed).
    pub show_item_errors: bool,
    /// Minimum spacing between two throughput samples.
    pub progress_sample: Duration,
    /// How often the status message is refreshed from the progress channel.
    pub status_refresh: Duration,
    /// Retry spacing after a failed status edit.
    pub status_retry: Duration,
    /// Deletion attempts for one transient file.
    pub cleanup_attempts: u32,
    /// Pause between two deletion attempts.
    pub cleanup_backoff: Duration,
    /// Pause before the first deletion attempt (lets the uploader release handles).
    pub cleanup_settle: Duration,
    /// Directory receiving downloaded media for the duration of one item.
    pub download_dir: PathBuf,
}

impl Default for RelayTuning {
    fn default() -> Self {
        Self {
            item_delay: Duration::from_millis(100),
            show_item_errors: true,
            progress_sample: Duration::from_secs(1),
            status_refresh: Duration::from_secs(10),
            status_retry: Duration::from_secs(5),
            cleanup_attempts: 5,
            cleanup_backoff: Duration::from_secs(1),
            cleanup_settle: Duration::from_millis(500),
            download_dir: PathBuf::from("downloads"),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        // Required env vars
        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        let gateway_url = env_str("GATEWAY_URL").and_then(non_empty).ok_or_else(|| {
            Error::Config("GATEWAY_URL environment variable is required".to_string())
        })?;
        let gateway_api_key = env_str("GATEWAY_API_KEY").and_then(non_empty);

        // Storage
        let download_dir = env_path("DOWNLOAD_DIR").unwrap_or_else(|| PathBuf::from("downloads"));
        let store_file =
            env_path("STORE_FILE").unwrap_or_else(|| PathBuf::from("relay-store.json"));
        let status_ledger_file = env_path("STATUS_LEDGER_FILE")
            .unwrap_or_else(|| PathBuf::from("relay-status-ledger.json"));

        // The download area must exist before the first transfer.
        fs::create_dir_all(&download_dir)?;

        let daily_quota = env_u32("DAILY_QUOTA").unwrap_or(10);

        let defaults = RelayTuning::default();
        let relay = RelayTuning {
            item_delay: env_millis("ITEM_DELAY_MS").unwrap_or(defaults.item_delay),
            show_item_errors: env_bool("SHOW_ITEM_ERRORS").unwrap_or(defaults.show_item_errors),
            progress_sample: env_millis("PROGRESS_SAMPLE_MS").unwrap_or(defaults.progress_sample),
            status_refresh: env_millis("STATUS_REFRESH_MS").unwrap_or(defaults.status_refresh),
            status_retry: env_millis("STATUS_RETRY_MS").unwrap_or(defaults.status_retry),
            cleanup_attempts: env_u32("CLEANUP_ATTEMPTS")
                .unwrap_or(defaults.cleanup_attempts)
                .max(1),
            cleanup_backoff: env_millis("CLEANUP_BACKOFF_MS").unwrap_or(defaults.cleanup_backoff),
            cleanup_settle: env_millis("CLEANUP_SETTLE_MS").unwrap_or(defaults.cleanup_settle),
            download_dir: download_dir.clone(),
        };

        Ok(Self {
            telegram_bot_token,
            gateway_url,
            gateway_api_key,
            download_dir,
            store_file,
            status_ledger_file,
            daily_quota,
            relay,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, strip_quotes(v.trim()));
    }
}

fn strip_quotes(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return &val[1..val.len() - 1];
    }
    val
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| parse_bool(&s))
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_str(key)
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
