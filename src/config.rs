use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Lightkeeper: scheduled Lighthouse audits with score history.
#[derive(Parser, Debug, Clone)]
#[command(name = "lightkeeper")]
pub struct CliArgs {
    /// HTTP port
    #[arg(long = "port", env = "LIGHTKEEPER_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// SQLite database file for pages and audit scores
    #[arg(long = "db-path", env = "LIGHTKEEPER_DB_PATH", default_value = DEFAULT_DB_PATH)]
    pub db_path: PathBuf,

    /// Directory for the rolling application log
    #[arg(long = "log-dir", env = "LIGHTKEEPER_LOG_DIR", default_value = DEFAULT_LOG_DIR)]
    pub log_dir: PathBuf,

    /// Lighthouse executable
    #[arg(long = "lighthouse-bin", env = "LIGHTKEEPER_LIGHTHOUSE_BIN", default_value = DEFAULT_LIGHTHOUSE_BIN)]
    pub lighthouse_bin: String,

    /// Directory for transient report files (defaults to the system temp dir)
    #[arg(long = "artifact-dir", env = "LIGHTKEEPER_ARTIFACT_DIR")]
    pub artifact_dir: Option<PathBuf>,

    /// Wall-clock limit for a single audit
    #[arg(long = "audit-timeout-secs", env = "LIGHTKEEPER_AUDIT_TIMEOUT_SECS", default_value_t = DEFAULT_AUDIT_TIMEOUT_SECS)]
    pub audit_timeout_secs: u64,

    /// Maximum number of Lighthouse processes running at once
    #[arg(long = "max-concurrent-audits", env = "LIGHTKEEPER_MAX_CONCURRENT_AUDITS", default_value_t = DEFAULT_MAX_CONCURRENT_AUDITS)]
    pub max_concurrent_audits: usize,

    /// Run a batch over all enabled pages every N seconds
    #[arg(long = "schedule-interval-secs", env = "LIGHTKEEPER_SCHEDULE_INTERVAL_SECS")]
    pub schedule_interval_secs: Option<u64>,

    /// Slack incoming-webhook URL for error alerts
    #[arg(long = "slack-webhook", env = "LIGHTKEEPER_SLACK_WEBHOOK")]
    pub slack_webhook: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LightkeeperConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub log_dir: PathBuf,
    pub lighthouse_bin: String,
    pub artifact_dir: PathBuf,
    pub audit_timeout: Duration,
    pub max_concurrent_audits: usize,
    pub schedule_interval: Option<Duration>,
    pub slack_webhook: Option<String>,
}

pub const APP_NAME: &str = "lightkeeper";

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_DB_PATH: &str = "lightkeeper.db";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const LOG_FILE_PREFIX: &str = "app.log";

// Audit constants
pub const DEFAULT_LIGHTHOUSE_BIN: &str = "lighthouse";
pub const DEFAULT_AUDIT_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_MAX_CONCURRENT_AUDITS: usize = 2;
pub const ARTIFACT_PREFIX: &str = "lighthouse-";
pub const STDERR_TAIL_BYTES: usize = 8 * 1024;

// Chrome flags for headless runs inside containers.
pub const CHROME_FLAGS: &str = "--headless --no-sandbox --disable-dev-shm-usage --disable-gpu";

// Notification constants
pub const SLACK_USERNAME: &str = "lightkeeper_service";
pub const SLACK_ICON_EMOJI: &str = ":tokyo_tower:";
pub const NOTIFY_TIMEOUT_SECS: u64 = 10;

// CORS origins for the dashboard dev server
pub const DASHBOARD_ORIGINS: &[&str] = &["http://localhost:3000", "http://127.0.0.1:3000"];

impl LightkeeperConfig {
    pub fn from_args(args: CliArgs) -> Self {
        let artifact_dir = args.artifact_dir.unwrap_or_else(std::env::temp_dir);
        let slack_webhook = args.slack_webhook.filter(|url| !url.trim().is_empty());

        LightkeeperConfig {
            port: args.port,
            db_path: args.db_path,
            log_dir: args.log_dir,
            lighthouse_bin: args.lighthouse_bin,
            artifact_dir,
            audit_timeout: Duration::from_secs(args.audit_timeout_secs.max(1)),
            max_concurrent_audits: args.max_concurrent_audits.max(1),
            schedule_interval: args
                .schedule_interval_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            slack_webhook,
        }
    }
}
