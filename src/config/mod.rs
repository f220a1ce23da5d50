use anyhow::{Context, Result};
use chrono::{NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub scrape: ScrapeConfig,
}

/// Persistence configuration (embedded DuckDB file)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path", alias = "database")]
    pub path: PathBuf,

    #[serde(default = "default_connection_timeout_secs", alias = "connection_timeout")]
    pub connection_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Headless browser configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserConfig {
    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default)]
    pub executable_path: Option<PathBuf>,

    #[serde(default = "default_launch_args")]
    pub launch_args: Vec<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Artificial delay after interactions so dynamic content can settle.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_navigation_retries")]
    pub navigation_retries: usize,
}

/// When each job is due. Times are wall-clock in `timezone`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_trading_days")]
    pub trading_days: Vec<Weekday>,

    #[serde(default = "default_trading_start")]
    pub trading_start: NaiveTime,

    #[serde(default = "default_trading_end")]
    pub trading_end: NaiveTime,

    #[serde(default = "default_index_poll_secs")]
    pub index_poll_secs: u64,

    #[serde(default = "default_news_times")]
    pub news_times: Vec<NaiveTime>,

    #[serde(default = "default_market_status_times")]
    pub market_status_times: Vec<NaiveTime>,

    #[serde(default = "default_announcement_times")]
    pub announcement_times: Vec<NaiveTime>,

    #[serde(default = "default_eps_times")]
    pub eps_times: Vec<NaiveTime>,

    #[serde(default = "default_floorsheet_times")]
    pub floorsheet_times: Vec<NaiveTime>,

    #[serde(default = "default_day_start_hour")]
    pub day_start_hour: u32,

    #[serde(default = "default_day_end_hour")]
    pub day_end_hour: u32,
}

/// Notification-time assignment and the outbound trigger
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifyConfig {
    #[serde(default = "default_slot_start")]
    pub day_start_slot_start: NaiveTime,

    #[serde(default = "default_slot_end")]
    pub day_start_slot_end: NaiveTime,

    #[serde(default = "default_slot_step_mins")]
    pub day_start_slot_step_mins: i64,

    #[serde(default = "default_day_end_first_hour")]
    pub day_end_first_hour: u32,

    #[serde(default = "default_day_end_last_hour")]
    pub day_end_last_hour: u32,

    #[serde(default = "default_announcement_window_start")]
    pub announcement_window_start: NaiveTime,

    #[serde(default = "default_announcement_window_end")]
    pub announcement_window_end: NaiveTime,

    /// Exclude rows that already carry a notify_time from both phases.
    #[serde(default)]
    pub skip_already_scheduled: bool,

    #[serde(default = "default_endpoint")]
    pub endpoint: Option<String>,

    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
}

/// Scrape-wide knobs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScrapeConfig {
    #[serde(default = "default_floorsheet_days")]
    pub floorsheet_days: u32,

    #[serde(default = "default_news_window_days")]
    pub news_window_days: i64,

    /// Upper bound on pages visited by any paginated traversal.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/nepse.duckdb")
}
fn default_connection_timeout_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_launch_args() -> Vec<String> {
    vec![
        "--no-sandbox".to_string(),
        "--disable-gpu".to_string(),
        "--disable-software-rasterizer".to_string(),
    ]
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string()
}
fn default_timeout_ms() -> u64 {
    60_000
}
fn default_settle_delay_ms() -> u64 {
    2_000
}
fn default_navigation_retries() -> usize {
    2
}
fn default_timezone() -> String {
    "Asia/Kathmandu".to_string()
}
fn default_trading_days() -> Vec<Weekday> {
    vec![Weekday::Sun, Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu]
}
fn default_trading_start() -> NaiveTime {
    hm(11, 0)
}
fn default_trading_end() -> NaiveTime {
    hm(15, 1)
}
fn default_index_poll_secs() -> u64 {
    60
}
fn default_news_times() -> Vec<NaiveTime> {
    vec![hm(11, 45), hm(17, 29)]
}
fn default_market_status_times() -> Vec<NaiveTime> {
    vec![hm(10, 55), hm(15, 5)]
}
fn default_announcement_times() -> Vec<NaiveTime> {
    vec![hm(10, 30)]
}
fn default_eps_times() -> Vec<NaiveTime> {
    vec![hm(18, 0)]
}
fn default_floorsheet_times() -> Vec<NaiveTime> {
    vec![hm(19, 0)]
}
fn default_day_start_hour() -> u32 {
    11
}
fn default_day_end_hour() -> u32 {
    16
}
fn default_slot_start() -> NaiveTime {
    hm(11, 30)
}
fn default_slot_end() -> NaiveTime {
    hm(16, 0)
}
fn default_slot_step_mins() -> i64 {
    120
}
fn default_day_end_first_hour() -> u32 {
    16
}
fn default_day_end_last_hour() -> u32 {
    18
}
fn default_announcement_window_start() -> NaiveTime {
    hm(11, 0)
}
fn default_announcement_window_end() -> NaiveTime {
    hm(18, 0)
}
fn default_endpoint() -> Option<String> {
    Some("https://hamrolagani.com/api/news/schedule-notification".to_string())
}
fn default_notify_timeout_secs() -> u64 {
    30
}
fn default_floorsheet_days() -> u32 {
    30
}
fn default_news_window_days() -> i64 {
    7
}
fn default_max_pages() -> u32 {
    50
}
fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            connection_timeout_secs: default_connection_timeout_secs(),
            run_migrations: true,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            executable_path: None,
            launch_args: default_launch_args(),
            user_agent: default_user_agent(),
            default_timeout_ms: default_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            navigation_retries: default_navigation_retries(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            trading_days: default_trading_days(),
            trading_start: default_trading_start(),
            trading_end: default_trading_end(),
            index_poll_secs: default_index_poll_secs(),
            news_times: default_news_times(),
            market_status_times: default_market_status_times(),
            announcement_times: default_announcement_times(),
            eps_times: default_eps_times(),
            floorsheet_times: default_floorsheet_times(),
            day_start_hour: default_day_start_hour(),
            day_end_hour: default_day_end_hour(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            day_start_slot_start: default_slot_start(),
            day_start_slot_end: default_slot_end(),
            day_start_slot_step_mins: default_slot_step_mins(),
            day_end_first_hour: default_day_end_first_hour(),
            day_end_last_hour: default_day_end_last_hour(),
            announcement_window_start: default_announcement_window_start(),
            announcement_window_end: default_announcement_window_end(),
            skip_already_scheduled: false,
            endpoint: default_endpoint(),
            timeout_secs: default_notify_timeout_secs(),
        }
    }
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            floorsheet_days: default_floorsheet_days(),
            news_window_days: default_news_window_days(),
            max_pages: default_max_pages(),
            logs_dir: default_logs_dir(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            browser: BrowserConfig::default(),
            schedule: ScheduleConfig::default(),
            notify: NotifyConfig::default(),
            scrape: ScrapeConfig::default(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("NEPSE").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|e| {
            warn!("Invalid configuration ({}), falling back to defaults", e);
            AppConfig::default()
        });
        Ok(app_cfg)
    }
}

impl ScheduleConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Unknown timezone {:?}", self.timezone))
    }
}
