use clap::Parser;
use std::path::{Path, PathBuf};

/// Directory under `$HOME` holding the store, credentials and logs.
pub const APP_DIR_NAME: &str = ".restock-stats";

/// File name of the event store inside [`APP_DIR_NAME`].
pub const STORE_FILE_NAME: &str = "restock_events.json";

/// File name of the timeline API credentials inside [`APP_DIR_NAME`].
pub const TIMELINE_CREDENTIALS_FILE_NAME: &str = "timeline_credentials.json";

/// File name of the spreadsheet credentials inside [`APP_DIR_NAME`].
pub const SHEET_CREDENTIALS_FILE_NAME: &str = "sheet_credentials.json";

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Collect restock notifications and publish restock frequency statistics
#[derive(Parser, Debug, Clone)]
#[command(
    name = "restock-stats",
    about = "Collect restock notifications and publish restock frequency statistics",
    version
)]
pub struct Settings {
    /// Account whose notifications are collected
    #[arg(long, env = "RESTOCK_ACCOUNT", default_value = "SnailMonitor")]
    pub account: String,

    /// Product registry JSON file (built-in registry when omitted)
    #[arg(long, env = "RESTOCK_REGISTRY")]
    pub registry: Option<PathBuf>,

    /// Event store file
    #[arg(long, env = "RESTOCK_STORE")]
    pub store: Option<PathBuf>,

    /// Timeline API credentials file
    #[arg(long, env = "RESTOCK_TIMELINE_CREDENTIALS")]
    pub timeline_credentials: Option<PathBuf>,

    /// Spreadsheet credentials file
    #[arg(long, env = "RESTOCK_SHEET_CREDENTIALS")]
    pub sheet_credentials: Option<PathBuf>,

    /// Sheet (tab) the report overwrites
    #[arg(long, env = "RESTOCK_SHEET_NAME", default_value = "Restocks")]
    pub sheet_name: String,

    /// Where the report goes
    #[arg(long, env = "RESTOCK_PUBLISH", default_value = "sheet", value_parser = ["sheet", "csv", "stdout"])]
    pub publish: String,

    /// Output path when publishing to CSV
    #[arg(long, env = "RESTOCK_CSV_PATH", default_value = "restock_stats.csv")]
    pub csv_path: PathBuf,

    /// Report timezone (auto-detected if not specified)
    #[arg(long, env = "RESTOCK_TIMEZONE", default_value = "auto")]
    pub timezone: String,

    /// Provider recency window in days
    #[arg(long, env = "RESTOCK_LOOKBACK_DAYS", default_value = "7", value_parser = clap::value_parser!(u32).range(1..=30))]
    pub lookback_days: u32,

    /// Maximum pages fetched per run
    #[arg(long, env = "RESTOCK_MAX_PAGES", default_value = "10", value_parser = clap::value_parser!(u32).range(1..=1000))]
    pub max_pages: u32,

    /// Messages requested per page (10-100)
    #[arg(long, env = "RESTOCK_PAGE_SIZE", default_value = "100", value_parser = clap::value_parser!(u32).range(10..=100))]
    pub page_size: u32,

    /// Skip fetching and republish statistics from the stored history
    #[arg(long)]
    pub skip_fetch: bool,

    /// Do not follow message links to look up retailer product ids (ASIN)
    #[arg(long, env = "RESTOCK_NO_RESOLVE_LINKS")]
    pub no_resolve_links: bool,

    /// Logging level
    #[arg(long, env = "RESTOCK_LOG_LEVEL", default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub log_level: String,

    /// Log file path
    #[arg(long, env = "RESTOCK_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

/// Destination selected by `--publish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishTarget {
    Sheet,
    Csv,
    Stdout,
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Parse the process arguments and environment.
    pub fn load() -> Self {
        Self::load_from_args(std::env::args_os())
    }

    /// Same as [`Settings::load`] but with an explicit argument list, so tests
    /// do not depend on the process command line.
    pub fn load_from_args<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut settings = Settings::parse_from(args);
        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }
        settings
    }

    pub fn publish_target(&self) -> PublishTarget {
        match self.publish.as_str() {
            "csv" => PublishTarget::Csv,
            "stdout" => PublishTarget::Stdout,
            _ => PublishTarget::Sheet,
        }
    }

    /// Event store path, defaulting to `~/.restock-stats/restock_events.json`.
    pub fn store_path(&self) -> PathBuf {
        self.store
            .clone()
            .unwrap_or_else(|| app_dir().join(STORE_FILE_NAME))
    }

    pub fn timeline_credentials_path(&self) -> PathBuf {
        self.timeline_credentials
            .clone()
            .unwrap_or_else(|| app_dir().join(TIMELINE_CREDENTIALS_FILE_NAME))
    }

    pub fn sheet_credentials_path(&self) -> PathBuf {
        self.sheet_credentials
            .clone()
            .unwrap_or_else(|| app_dir().join(SHEET_CREDENTIALS_FILE_NAME))
    }

    pub fn registry_path(&self) -> Option<&Path> {
        self.registry.as_deref()
    }
}

/// Return the application directory, `~/.restock-stats/`.
pub fn app_dir() -> PathBuf {
    app_dir_in(&dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
}

/// Return the application directory rooted at `base_dir` (used for testing).
pub fn app_dir_in(base_dir: &Path) -> PathBuf {
    base_dir.join(APP_DIR_NAME)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
