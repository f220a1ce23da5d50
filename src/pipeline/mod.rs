//! Job orchestrator: ties scraper drivers → storage → notifications.
//!
//! ## Jobs
//!
//! * `news`: scrape every listing, insert unseen items, run the notify phase
//!   for the current hour, then POST the outbound trigger.
//! * `announcements` / `floorsheet`: per-symbol drivers, one browser each.
//! * `indices`: gated on the market-hours check; the check result is stored.
//! * `market-status`: only the check.
//! * `eps`: the EPS/PE table in one pass.
//! * `notify`: a notify phase on its own.
//!
//! Every run is recorded in `scrape_runs`.

pub mod schedule;

use crate::config::{AppConfig, DatabaseConfig};
use crate::logging::{self, SourceLog};
use crate::models::{FloorsheetTrade, UpsertReport};
use crate::notify::{DayPhase, NotifyClient, NotifyScheduler};
use crate::scraper::floorsheet::TradeSink;
use crate::scraper::news::NewsWindow;
use crate::scraper::{
    ChromeSessionFactory, DriverOptions, SessionFactory, announcements, cleaner, eps, floorsheet,
    indices, market, news, sites,
};
use crate::storage::Repository;
use crate::utils::Timer;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    News,
    Announcements { symbol: Option<String> },
    Floorsheet { symbol: Option<String>, days: Option<u32> },
    Indices { force: bool },
    MarketStatus,
    Eps,
    Notify { phase: Option<DayPhase> },
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::News => "news",
            Job::Announcements { .. } => "announcements",
            Job::Floorsheet { .. } => "floorsheet",
            Job::Indices { .. } => "indices",
            Job::MarketStatus => "market-status",
            Job::Eps => "eps",
            Job::Notify { .. } => "notify",
        }
    }

    fn source(&self) -> &'static str {
        match self {
            Job::News | Job::Notify { .. } => logging::NEWS,
            Job::Announcements { .. } => logging::ANNOUNCEMENTS,
            Job::Floorsheet { .. } => logging::FLOORSHEET,
            Job::Indices { .. } => logging::INDICES,
            Job::MarketStatus => logging::MARKET_STATUS,
            Job::Eps => logging::EPS,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub processed: usize,
    pub report: UpsertReport,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} processed, {}", self.processed, self.report)
    }
}

/// Open the store within the configured bound and apply migrations.
pub async fn open_repository(cfg: &DatabaseConfig) -> Result<Repository> {
    let path = cfg.path.clone();
    let limit = Duration::from_secs(cfg.connection_timeout_secs);
    let repo = tokio::time::timeout(limit, tokio::task::spawn_blocking(move || Repository::open(&path)))
        .await
        .map_err(|_| anyhow!("Timed out after {:?} opening {:?}", limit, cfg.path))?
        .context("Open task failed")??;

    if cfg.run_migrations {
        repo.run_migrations()?;
    }
    Ok(repo)
}

/// One file-backed log per source.
pub fn file_logs(dir: &std::path::Path, tz: Tz) -> Result<HashMap<&'static str, SourceLog>> {
    logging::SOURCES
        .iter()
        .map(|s| Ok((*s, SourceLog::to_file(dir, s, tz)?)))
        .collect()
}

/// A job's own connection. Calls run on the blocking pool, so a slow statement
/// holds up only the job that issued it.
#[derive(Clone)]
struct JobStore {
    repo: Arc<Mutex<Repository>>,
}

impl JobStore {
    fn new(repo: Repository) -> Self {
        Self { repo: Arc::new(Mutex::new(repo)) }
    }

    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Repository) -> Result<T> + Send + 'static,
    {
        let repo = Arc::clone(&self.repo);
        tokio::task::spawn_blocking(move || {
            let repo = repo.lock().map_err(|_| anyhow!("Connection lock poisoned"))?;
            f(&repo)
        })
        .await
        .context("Storage task failed")?
    }
}

/// Adapts the job's store to the floorsheet driver's per-page sink.
struct RepositorySink {
    store: JobStore,
    log: SourceLog,
    tz: Tz,
}

#[async_trait]
impl TradeSink for RepositorySink {
    async fn save(&self, trades: &[FloorsheetTrade]) -> Result<UpsertReport> {
        let trades = trades.to_vec();
        let log = self.log.clone();
        let now = local_now(self.tz);
        self.store.call(move |repo| repo.upsert_floorsheet(&trades, now, &log)).await
    }
}

fn local_now(tz: Tz) -> NaiveDateTime {
    Utc::now().with_timezone(&tz).naive_local()
}

pub struct Pipeline {
    config: AppConfig,
    repo: Repository,
    factory: Box<dyn SessionFactory>,
    logs: HashMap<&'static str, SourceLog>,
    opts: DriverOptions,
    tz: Tz,
    fixed_now: Option<NaiveDateTime>,
}

impl Pipeline {
    pub fn new(
        config: AppConfig,
        repo: Repository,
        factory: Box<dyn SessionFactory>,
        logs: HashMap<&'static str, SourceLog>,
    ) -> Result<Self> {
        let tz = config.schedule.tz()?;
        let opts = DriverOptions::from_config(&config);
        Ok(Self { config, repo, factory, logs, opts, tz, fixed_now: None })
    }

    /// Production wiring: DuckDB file, headless Chromium, `logs/<source>.log`.
    pub async fn open(config: AppConfig) -> Result<Self> {
        let repo = open_repository(&config.database).await.context("Failed to open DuckDB")?;
        let tz = config.schedule.tz()?;
        let logs = file_logs(&config.scrape.logs_dir, tz)?;
        let factory = Box::new(ChromeSessionFactory::new(&config.browser));
        Self::new(config, repo, factory, logs)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn now(&self) -> NaiveDateTime {
        self.fixed_now.unwrap_or_else(|| local_now(self.tz))
    }

    fn log(&self, source: &'static str) -> Result<&SourceLog> {
        self.logs.get(source).ok_or_else(|| anyhow!("No log sink for {}", source))
    }

    /// Run one job on its own connection and record it.
    pub async fn run(&self, job: &Job) -> Result<PipelineStats> {
        let _t = Timer::start(job.name());
        let store = JobStore::new(self.repo.try_clone()?);
        let log = self.log(job.source())?;
        let (name, started) = (job.name(), self.now());
        let run_id = store.call(move |repo| repo.begin_scrape_run(name, started)).await?;

        let result = match job {
            Job::News => self.news(&store, log).await,
            Job::Announcements { symbol } => self.announcements(&store, symbol.as_deref(), log).await,
            Job::Floorsheet { symbol, days } => self.floorsheet(&store, symbol.as_deref(), *days, log).await,
            Job::Indices { force } => self.indices(&store, *force, log).await,
            Job::MarketStatus => self.market_status(&store, log).await.map(|_| PipelineStats::default()),
            Job::Eps => self.eps(&store, log).await,
            Job::Notify { phase } => self.notify(&store, *phase, log).await,
        };

        let (processed, written, error) = match &result {
            Ok(stats) => (stats.processed, stats.report.written, None),
            Err(e) => (0, 0, Some(format!("{:#}", e))),
        };
        let finished = self.now();
        let recorded = error.clone();
        let finish = store
            .call(move |repo| repo.finish_scrape_run(run_id, finished, processed, written, recorded.as_deref()))
            .await;
        if let Err(e) = finish {
            warn!("Could not record run {} of {}: {:#}", run_id, name, e);
        }
        if let Some(e) = &error {
            log.error(format!("{} failed: {}", name, e));
        }
        result
    }

    /// Stored symbols, or just `only`. A failed lookup is fatal for the job.
    async fn symbols(&self, store: &JobStore, only: Option<&str>, log: &SourceLog) -> Result<Vec<String>> {
        if let Some(symbol) = only {
            return Ok(vec![cleaner::normalise_symbol(symbol)]);
        }
        let symbols = store.call(|repo| repo.list_symbols()).await.context("Stock symbol lookup failed")?;
        if symbols.is_empty() {
            log.warn("No stock symbols stored; run load-reference first");
        }
        Ok(symbols)
    }

    // ── News + notifications ──────────────────────────────────────────────────

    async fn news(&self, store: &JobStore, log: &SourceLog) -> Result<PipelineStats> {
        let now = self.now();
        log.info(format!("Starting scrapers at {}", cleaner::canonical(&now)));

        let window = NewsWindow {
            now,
            days: self.config.scrape.news_window_days,
            day_start_hour: self.config.schedule.day_start_hour,
        };
        let items = news::scrape_all(self.factory.as_ref(), &sites::all_news_listings(), window, &self.opts, log).await;
        let processed = items.len();
        let insert_log = log.clone();
        let report = store.call(move |repo| repo.insert_news(&items, now, &insert_log)).await?;
        log.info(format!("News inserted Successfully at {}", cleaner::canonical(&now)));

        self.notify_phase(store, None, now, log).await?;
        self.trigger(log).await?;

        Ok(PipelineStats { processed, report })
    }

    async fn notify(&self, store: &JobStore, phase: Option<DayPhase>, log: &SourceLog) -> Result<PipelineStats> {
        let assigned = self.notify_phase(store, phase, self.now(), log).await?;
        self.trigger(log).await?;
        Ok(PipelineStats {
            processed: assigned,
            report: UpsertReport { written: assigned, ..Default::default() },
        })
    }

    /// `phase`, or whichever phase the current hour falls in.
    async fn notify_phase(
        &self,
        store: &JobStore,
        phase: Option<DayPhase>,
        now: NaiveDateTime,
        log: &SourceLog,
    ) -> Result<usize> {
        let sched = &self.config.schedule;
        let Some(phase) = phase.or_else(|| DayPhase::at(now.hour(), sched.day_start_hour, sched.day_end_hour)) else {
            log.info(format!("No notification phase at {}:00", now.hour()));
            return Ok(0);
        };
        let cfg = self.config.notify.clone();
        let phase_log = log.clone();
        let assigned = store
            .call(move |repo| NotifyScheduler::new(repo, &cfg, &phase_log).run_phase(phase, now, &mut rand::rng()))
            .await?;
        log.info(format!("Notification Scheduled Successfully ({} {})", assigned, phase));
        Ok(assigned)
    }

    async fn trigger(&self, log: &SourceLog) -> Result<()> {
        if let Some(client) = NotifyClient::new(&self.config.notify, &self.config.browser.user_agent)? {
            client.trigger(log).await;
        }
        Ok(())
    }

    // ── Announcements ─────────────────────────────────────────────────────────

    async fn announcements(&self, store: &JobStore, only: Option<&str>, log: &SourceLog) -> Result<PipelineStats> {
        let symbols = self.symbols(store, only, log).await?;
        let page = sites::announcements();
        let notify = &self.config.notify;
        let window = (notify.announcement_window_start, notify.announcement_window_end);
        let mut stats = PipelineStats::default();

        for symbol in &symbols {
            let now = self.now();
            let scraped = match self.factory.open().await {
                Ok(session) => {
                    announcements::scrape_announcements(session.as_ref(), &page, symbol, now.date(), &self.opts, log)
                        .await
                }
                Err(e) => Err(e),
            };
            match scraped {
                Ok(items) => {
                    stats.processed += items.len();
                    let insert_log = log.clone();
                    let report = store
                        .call(move |repo| repo.insert_announcements(&items, now, window, &mut rand::rng(), &insert_log))
                        .await?;
                    log.info(format!("{}: {}", symbol, report));
                    stats.report.merge(report);
                }
                Err(e) => log.error(format!("Error processing {}: {}", symbol, e)),
            }
        }
        Ok(stats)
    }

    // ── Floorsheet ────────────────────────────────────────────────────────────

    async fn floorsheet(
        &self,
        store: &JobStore,
        only: Option<&str>,
        days: Option<u32>,
        log: &SourceLog,
    ) -> Result<PipelineStats> {
        let symbols = self.symbols(store, only, log).await?;
        let days = days.unwrap_or(self.config.scrape.floorsheet_days);
        let sink = RepositorySink { store: store.clone(), log: log.clone(), tz: self.tz };

        let report = floorsheet::scrape_symbols(
            self.factory.as_ref(),
            &sites::floorsheet(),
            &symbols,
            self.now().date(),
            days,
            &self.opts,
            &sink,
            log,
        )
        .await;
        Ok(PipelineStats { processed: report.written + report.skipped + report.failed, report })
    }

    // ── Market gate + indices ─────────────────────────────────────────────────

    async fn market_status(&self, store: &JobStore, log: &SourceLog) -> Result<bool> {
        let live = market::check_market(self.factory.as_ref(), &sites::market_status(), &self.opts, log).await;
        let now = self.now();
        store.call(move |repo| repo.set_market_status(live, now)).await?;
        log.info(format!("Market status updated to {}", if live { "open" } else { "closed" }));
        Ok(live)
    }

    async fn indices(&self, store: &JobStore, force: bool, log: &SourceLog) -> Result<PipelineStats> {
        let live = self.market_status(store, log).await?;
        if !live && !force {
            log.info("Market is closed, live index scrape skipped");
            return Ok(PipelineStats::default());
        }

        let session = self.factory.open().await?;
        let snapshots = indices::scrape_indices(
            session.as_ref(),
            &sites::index_widget(),
            &sites::INDEX_NAMES,
            &self.opts,
            log,
        )
        .await?;
        drop(session);

        let processed = snapshots.len();
        let (now, upsert_log) = (self.now(), log.clone());
        let report = store.call(move |repo| repo.upsert_index_snapshots(&snapshots, now, &upsert_log)).await?;
        log.info(format!("Index data upserted: {}", report));
        Ok(PipelineStats { processed, report })
    }

    // ── EPS / PE ──────────────────────────────────────────────────────────────

    async fn eps(&self, store: &JobStore, log: &SourceLog) -> Result<PipelineStats> {
        let session = self.factory.open().await?;
        let records = eps::scrape_eps(session.as_ref(), &sites::eps_table(), &self.opts, log).await?;
        drop(session);
        log.info("Browser closed.");

        let processed = records.len();
        let (now, upsert_log) = (self.now(), log.clone());
        let report = store.call(move |repo| repo.upsert_eps(&records, now, &upsert_log)).await?;
        Ok(PipelineStats { processed, report })
    }
}

#[cfg(test)]
impl Pipeline {
    fn at(mut self, now: NaiveDateTime) -> Self {
        self.fixed_now = Some(now);
        self
    }

    fn with_options(mut self, opts: DriverOptions) -> Self {
        self.opts = opts;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemorySink;
    use crate::models::{NewsCategory, NewsItem, Sector, Stock};
    use crate::scraper::session::fake::{FakeFactory, FakeSession};

    const STATUS_URL: &str = "https://www.nepalstock.com.np/";
    const LIVE_URL: &str = "https://www.sharesansar.com/live-trading";

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn dashboard(status: &str) -> String {
        format!(
            r#"<app-dashboard><div><div><div><div><div>
                 <div>Market</div>
                 <div><span>Status:</span><span>{}</span></div>
               </div></div></div></div></div></app-dashboard>"#,
            status
        )
    }

    fn pipeline(sessions: Vec<FakeSession>) -> (Pipeline, HashMap<&'static str, MemorySink>) {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        let now = at("2026-10-18 09:00:00");
        repo.upsert_stocks(&[Stock { symbol: "NABIL".into(), name: "Nabil Bank".into() }], now).unwrap();
        repo.upsert_sectors(&[Sector { index_display_name: "NEPSE Index".into() }], now).unwrap();

        let mut logs = HashMap::new();
        let mut sinks = HashMap::new();
        for source in logging::SOURCES {
            let (log, sink) = SourceLog::memory(source);
            logs.insert(source, log);
            sinks.insert(source, sink);
        }

        let mut config = AppConfig::default();
        config.notify.endpoint = None;
        let p = Pipeline::new(config, repo, Box::new(FakeFactory::new(sessions)), logs)
            .unwrap()
            .with_options(DriverOptions::fast());
        (p, sinks)
    }

    #[tokio::test]
    async fn closed_market_skips_indices_but_stores_status() {
        let (p, sinks) = pipeline(vec![FakeSession::new().page(STATUS_URL, &dashboard("Market Closed"))]);
        let p = p.at(at("2026-10-18 12:00:00"));

        let stats = p.run(&Job::Indices { force: false }).await.unwrap();
        assert_eq!(stats, PipelineStats::default());
        assert_eq!(p.repo.market_status().unwrap(), Some(false));
        assert!(sinks[logging::INDICES].contains("Market is closed"));
        assert_eq!(p.repo.last_run("indices").unwrap().unwrap().0, "success");
    }

    #[tokio::test]
    async fn live_market_snapshots_indices() {
        let widget = r#"<div class="bx-viewport"><div>
              <div><h4>NEPSE Index</h4><p class="mu-price">4,512,300.10</p>
                <p><span class="mu-value">2,745.31</span><span class="mu-percent">1.25%</span></p></div>
            </div></div>"#;
        let (p, _) = pipeline(vec![
            FakeSession::new().page(STATUS_URL, &dashboard("Live Market")),
            FakeSession::new().page(LIVE_URL, widget),
        ]);

        let stats = p.run(&Job::Indices { force: false }).await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.report.written, 1);
        assert_eq!(p.repo.market_status().unwrap(), Some(true));
        assert_eq!(p.repo.stats().unwrap().indices, 1);
    }

    #[tokio::test]
    async fn failed_job_is_recorded_as_error() {
        let (p, sinks) = pipeline(vec![]);
        let err = p.run(&Job::Eps).await.unwrap_err();
        assert!(err.to_string().contains("no browser available"));
        assert_eq!(p.repo.last_run("eps").unwrap().unwrap().0, "error");
        assert!(sinks[logging::EPS].contains("eps failed"));
    }

    #[tokio::test]
    async fn announcements_for_one_symbol_are_inserted() {
        let html = r#"<button id="btn_cannouncements">Announcements</button>
            <table id="myTableCAnnouncements"><tbody>
              <tr><td>2026-10-18</td><td>Book closure for AGM</td></tr>
              <tr><td>2026-09-30</td><td>Q1 report published</td></tr>
            </tbody></table>"#;
        let (p, sinks) = pipeline(vec![
            FakeSession::new().page("https://www.sharesansar.com/company/NABIL", html),
        ]);
        let p = p.at(at("2026-10-18 10:30:00"));

        let stats = p.run(&Job::Announcements { symbol: Some("nabil".into()) }).await.unwrap();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.report.written, 2);
        assert!(sinks[logging::ANNOUNCEMENTS].contains("Processing stock: NABIL"));
    }

    #[tokio::test]
    async fn notify_job_uses_the_hour_phase() {
        let (p, sinks) = pipeline(vec![]);
        let item = NewsItem {
            title: "X".into(),
            image: None,
            link: "https://a.b/1".into(),
            domain: "a.b".into(),
            published_at: at("2026-10-17 09:00:00"),
            category: NewsCategory::General,
            description: String::new(),
            should_notify: true,
            is_day_start: true,
        };
        p.repo.insert_news(&[item], at("2026-10-18 11:45:00"), &sinks_log()).unwrap();

        let idle = p.at(at("2026-10-18 13:10:00"));
        assert_eq!(idle.run(&Job::Notify { phase: None }).await.unwrap().processed, 0);
        assert!(sinks[logging::NEWS].contains("No notification phase at 13:00"));

        let morning = idle.at(at("2026-10-18 11:45:00"));
        assert_eq!(morning.run(&Job::Notify { phase: None }).await.unwrap().processed, 1);
        let row = &morning.repo.notify_candidates(true, false).unwrap()[0];
        assert!(row.notify_time.is_some());
    }

    #[tokio::test]
    async fn slow_storage_call_leaves_other_tasks_running() {
        let store = JobStore::new(Repository::open_in_memory().unwrap());
        let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });

        let out = store
            .call(|_| {
                std::thread::sleep(Duration::from_millis(200));
                Ok(7)
            })
            .await
            .unwrap();
        ticker.abort();

        assert_eq!(out, 7);
        assert!(ticks.load(std::sync::atomic::Ordering::SeqCst) > 0);
    }

    fn sinks_log() -> SourceLog {
        SourceLog::memory(logging::NEWS).0
    }
}
