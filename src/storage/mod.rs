use crate::logging::SourceLog;
use crate::models::{
    AnnouncementItem, EpsPeRecord, FloorsheetTrade, IndexSnapshot, NewsItem, NotifyCandidate, Sector,
    Stock, UpsertReport,
};
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use duckdb::{Connection, params};
use rand::seq::IteratorRandom;
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS seq_stock;
CREATE SEQUENCE IF NOT EXISTS seq_sector;
CREATE SEQUENCE IF NOT EXISTS seq_news;
CREATE SEQUENCE IF NOT EXISTS seq_announcements;
CREATE SEQUENCE IF NOT EXISTS seq_scrape_runs;

CREATE TABLE IF NOT EXISTS stock (
    id          BIGINT PRIMARY KEY DEFAULT nextval('seq_stock'),
    symbol      VARCHAR NOT NULL UNIQUE,
    name        VARCHAR NOT NULL DEFAULT '',
    created_at  TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS sector (
    id                  BIGINT PRIMARY KEY DEFAULT nextval('seq_sector'),
    index_display_name  VARCHAR NOT NULL UNIQUE,
    created_at          TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS news (
    id             BIGINT PRIMARY KEY DEFAULT nextval('seq_news'),
    title          VARCHAR NOT NULL,
    image          VARCHAR,
    link           VARCHAR NOT NULL,
    date           TIMESTAMP NOT NULL,
    domain         VARCHAR NOT NULL,
    description    VARCHAR NOT NULL DEFAULT '',
    category       VARCHAR NOT NULL,
    notify_time    TIMESTAMP,
    should_notify  BOOLEAN NOT NULL,
    is_day_start   BOOLEAN NOT NULL,
    created_at     TIMESTAMP NOT NULL,
    UNIQUE (title, link)
);

CREATE TABLE IF NOT EXISTS announcements (
    id             BIGINT PRIMARY KEY DEFAULT nextval('seq_announcements'),
    stock_id       BIGINT NOT NULL,
    date           DATE NOT NULL,
    announcement   VARCHAR NOT NULL,
    should_notify  BOOLEAN NOT NULL,
    notify_time    TIMESTAMP,
    created_at     TIMESTAMP NOT NULL,
    updated_at     TIMESTAMP NOT NULL,
    UNIQUE (stock_id, date, announcement)
);

CREATE TABLE IF NOT EXISTS live_indices_price (
    index_id            BIGINT PRIMARY KEY,
    last_trading_price  DOUBLE NOT NULL,
    percentage_change   DOUBLE NOT NULL,
    turnover            DOUBLE NOT NULL,
    created_at          TIMESTAMP NOT NULL,
    updated_at          TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS floorsheet (
    transaction_no   VARCHAR PRIMARY KEY,
    stock_id         BIGINT NOT NULL,
    buyer_broker_id  BIGINT NOT NULL,
    sell_broker_id   BIGINT NOT NULL,
    share_quantity   DOUBLE NOT NULL,
    rate             DOUBLE NOT NULL,
    amount           DOUBLE NOT NULL,
    date             DATE NOT NULL,
    created_at       TIMESTAMP NOT NULL,
    updated_at       TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS stock_eps_pe (
    stock_id    BIGINT PRIMARY KEY,
    eps         DOUBLE NOT NULL,
    pe_ratio    DOUBLE NOT NULL,
    created_at  TIMESTAMP NOT NULL,
    updated_at  TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS application_config (
    "key"       VARCHAR PRIMARY KEY,
    "value"     VARCHAR NOT NULL,
    created_at  TIMESTAMP NOT NULL,
    updated_at  TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS scrape_runs (
    id               BIGINT PRIMARY KEY DEFAULT nextval('seq_scrape_runs'),
    job              VARCHAR NOT NULL,
    started_at       TIMESTAMP NOT NULL,
    finished_at      TIMESTAMP,
    status           VARCHAR NOT NULL DEFAULT 'running',
    items_processed  BIGINT DEFAULT 0,
    items_written    BIGINT DEFAULT 0,
    error_msg        VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

// Only on insert-only tables: DuckDB cannot update indexed columns in place.
const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_announcements_date ON announcements (date);
"#;

const MARKET_STATUS_KEY: &str = "market_status";

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("access denied to database at {path:?}: {reason}")]
    AccessDenied { path: PathBuf, reason: String },

    #[error("database does not exist at {0:?}")]
    MissingDatabase(PathBuf),

    #[error("could not open database at {path:?}: {reason}")]
    Open { path: PathBuf, reason: String },
}

fn classify_open(path: &Path, reason: String) -> StorageError {
    let lower = reason.to_lowercase();
    if lower.contains("permission denied") || lower.contains("access is denied") || lower.contains("read-only") {
        StorageError::AccessDenied { path: path.to_path_buf(), reason }
    } else if lower.contains("no such file") || lower.contains("cannot open file") {
        StorageError::MissingDatabase(path.to_path_buf())
    } else {
        StorageError::Open { path: path.to_path_buf(), reason }
    }
}

// ── Repository ────────────────────────────────────────────────────────────────

enum RowOutcome {
    Written,
    Skipped,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct StoreStats {
    pub stocks: i64,
    pub sectors: i64,
    pub news: i64,
    pub news_scheduled: i64,
    pub announcements: i64,
    pub indices: i64,
    pub floorsheet: i64,
    pub eps: i64,
    pub runs: i64,
    pub market_open: Option<bool>,
    pub floorsheet_range: (Option<NaiveDate>, Option<NaiveDate>),
}

pub struct Repository {
    conn: Connection,
}

impl Repository {
    /// Open (creating if needed) the database file.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| match e.kind() {
                ErrorKind::PermissionDenied => StorageError::AccessDenied {
                    path: parent.to_path_buf(),
                    reason: e.to_string(),
                },
                _ => StorageError::Open { path: parent.to_path_buf(), reason: e.to_string() },
            })?;
        }
        let conn = Connection::open(path).map_err(|e| classify_open(path, e.to_string()))?;
        Ok(Self { conn })
    }

    /// Open a database that must already exist.
    pub fn open_existing(path: &Path) -> Result<Self, StorageError> {
        if !path.exists() {
            return Err(StorageError::MissingDatabase(path.to_path_buf()));
        }
        Self::open(path)
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    /// A second connection to the same database, for another job.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self { conn: self.conn.try_clone().context("Could not clone connection")? })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute_batch(INDEXES).context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, current_timestamp)",
            [],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    /// One transaction per call. A row whose SQL fails is logged and left
    /// out; DuckDB aborts a transaction on any statement error, so the
    /// remaining rows are replayed in a fresh transaction without it.
    fn write_batch<T>(
        &self,
        rows: &[T],
        describe: impl Fn(&T) -> String,
        log: &SourceLog,
        mut write: impl FnMut(&Connection, &T) -> Result<RowOutcome>,
    ) -> Result<UpsertReport> {
        let mut failed: HashSet<usize> = HashSet::new();
        loop {
            let tx = self.conn.unchecked_transaction()?;
            let mut report = UpsertReport { failed: failed.len(), ..Default::default() };
            let mut bad_row = None;

            for (i, row) in rows.iter().enumerate() {
                if failed.contains(&i) {
                    continue;
                }
                match write(&tx, row) {
                    Ok(RowOutcome::Written) => report.written += 1,
                    Ok(RowOutcome::Skipped) => report.skipped += 1,
                    Err(e) => {
                        log.error(format!("Could not write {}: {:#}", describe(row), e));
                        bad_row = Some(i);
                        break;
                    }
                }
            }

            match bad_row {
                Some(i) => {
                    failed.insert(i);
                    tx.rollback().ok();
                }
                None => {
                    tx.commit().context("Commit failed")?;
                    return Ok(report);
                }
            }
        }
    }

    // ── Reference data ────────────────────────────────────────────────────────

    pub fn upsert_stocks(&self, stocks: &[Stock], now: NaiveDateTime) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        for s in stocks {
            tx.execute(
                r#"INSERT INTO stock (symbol, name, created_at) VALUES (?, ?, ?)
                   ON CONFLICT (symbol) DO UPDATE SET name = excluded.name"#,
                params![s.symbol, s.name, now],
            )
            .with_context(|| format!("upsert stock {}", s.symbol))?;
        }
        tx.commit()?;
        Ok(stocks.len())
    }

    pub fn upsert_sectors(&self, sectors: &[Sector], now: NaiveDateTime) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        for s in sectors {
            tx.execute(
                "INSERT OR IGNORE INTO sector (index_display_name, created_at) VALUES (?, ?)",
                params![s.index_display_name, now],
            )
            .with_context(|| format!("insert sector {}", s.index_display_name))?;
        }
        tx.commit()?;
        Ok(sectors.len())
    }

    fn id_map(&self, sql: &str) -> Result<HashMap<String, i64>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(1)?, r.get::<_, i64>(0)?)))?;
        Ok(rows.collect::<Result<HashMap<_, _>, _>>()?)
    }

    pub fn stock_ids(&self) -> Result<HashMap<String, i64>> {
        self.id_map("SELECT id, symbol FROM stock")
    }

    pub fn sector_ids(&self) -> Result<HashMap<String, i64>> {
        self.id_map("SELECT id, index_display_name FROM sector")
    }

    pub fn list_symbols(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT symbol FROM stock ORDER BY symbol")?;
        let syms = stmt
            .query_map([], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(syms)
    }

    // ── News ──────────────────────────────────────────────────────────────────

    /// Insert items not already stored under (title, link).
    pub fn insert_news(&self, items: &[NewsItem], now: NaiveDateTime, log: &SourceLog) -> Result<UpsertReport> {
        let report = self.write_batch(
            items,
            |n| format!("news '{}'", n.title),
            log,
            |conn, n| {
                let exists: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM news WHERE title = ? AND link = ?",
                    params![n.title, n.link],
                    |r| r.get(0),
                )?;
                if exists > 0 {
                    debug!("Skipped: {} - already exists", n.title);
                    return Ok(RowOutcome::Skipped);
                }
                // The unique constraint settles races with a concurrent run.
                let inserted = conn.execute(
                    r#"INSERT OR IGNORE INTO news
                        (title, image, link, date, domain, description, category,
                         notify_time, should_notify, is_day_start, created_at)
                       VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?)"#,
                    params![
                        n.title,
                        n.image,
                        n.link,
                        n.published_at,
                        n.domain,
                        n.description,
                        n.category.as_str(),
                        n.should_notify,
                        n.is_day_start,
                        now,
                    ],
                )?;
                Ok(if inserted > 0 { RowOutcome::Written } else { RowOutcome::Skipped })
            },
        )?;
        log.info(format!("News inserted: {}", report));
        Ok(report)
    }

    /// Rows eligible for a notification phase, oldest first.
    pub fn notify_candidates(&self, day_start: bool, unassigned_only: bool) -> Result<Vec<NotifyCandidate>> {
        let sql = if unassigned_only {
            "SELECT id, title, notify_time FROM news
             WHERE should_notify = TRUE AND is_day_start = ? AND notify_time IS NULL ORDER BY id"
        } else {
            "SELECT id, title, notify_time FROM news
             WHERE should_notify = TRUE AND is_day_start = ? ORDER BY id"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![day_start], |r| {
                Ok(NotifyCandidate { id: r.get(0)?, title: r.get(1)?, notify_time: r.get(2)? })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Persist one assignment; committed on its own.
    pub fn set_news_notify_time(&self, id: i64, at: NaiveDateTime) -> Result<()> {
        self.conn
            .execute("UPDATE news SET notify_time = ? WHERE id = ?", params![at, id])
            .with_context(|| format!("set notify_time for news {}", id))?;
        Ok(())
    }

    // ── Announcements ─────────────────────────────────────────────────────────

    /// Insert unseen announcements. Ones dated today get a random notify time
    /// inside `window` today.
    pub fn insert_announcements<R>(
        &self,
        items: &[AnnouncementItem],
        now: NaiveDateTime,
        window: (NaiveTime, NaiveTime),
        rng: &mut R,
        log: &SourceLog,
    ) -> Result<UpsertReport>
    where
        R: rand::Rng + ?Sized,
    {
        let ids = self.stock_ids()?;
        let mut unresolved = 0;
        let mut resolved = Vec::with_capacity(items.len());
        for item in items {
            match ids.get(&item.symbol) {
                Some(&id) => {
                    let notify_time = item
                        .should_notify
                        .then(|| random_time_between(now.date(), window, rng));
                    resolved.push((id, item, notify_time));
                }
                None => {
                    log.warn(format!("Stock ID for {} not found", item.symbol));
                    unresolved += 1;
                }
            }
        }

        let mut report = self.write_batch(
            &resolved,
            |(_, a, _)| format!("announcement {} {}", a.symbol, a.date),
            log,
            |conn, (stock_id, a, notify_time)| {
                let exists: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM announcements WHERE stock_id = ? AND date = ? AND announcement = ?",
                    params![stock_id, a.date, a.text],
                    |r| r.get(0),
                )?;
                if exists > 0 {
                    return Ok(RowOutcome::Skipped);
                }
                let inserted = conn.execute(
                    r#"INSERT OR IGNORE INTO announcements
                        (stock_id, date, announcement, should_notify, notify_time, created_at, updated_at)
                       VALUES (?, ?, ?, ?, ?, ?, ?)"#,
                    params![stock_id, a.date, a.text, a.should_notify, notify_time, now, now],
                )?;
                Ok(if inserted > 0 { RowOutcome::Written } else { RowOutcome::Skipped })
            },
        )?;
        report.skipped += unresolved;
        Ok(report)
    }

    // ── Index snapshots ───────────────────────────────────────────────────────

    /// Latest snapshot wins; `created_at` of an existing row is kept.
    pub fn upsert_index_snapshots(
        &self,
        snapshots: &[IndexSnapshot],
        now: NaiveDateTime,
        log: &SourceLog,
    ) -> Result<UpsertReport> {
        let ids = self.sector_ids()?;
        let (resolved, unresolved) = resolve(snapshots, |s| ids.get(&s.index_name).copied(), |s| {
            log.warn(format!("Index '{}' has no sector row", s.index_name))
        });

        let mut report = self.write_batch(
            &resolved,
            |(_, s)| format!("index {}", s.index_name),
            log,
            |conn, (index_id, s)| {
                conn.execute(
                    r#"INSERT INTO live_indices_price
                        (index_id, last_trading_price, percentage_change, turnover, created_at, updated_at)
                       VALUES (?, ?, ?, ?, ?, ?)
                       ON CONFLICT (index_id) DO UPDATE SET
                           last_trading_price = excluded.last_trading_price,
                           percentage_change  = excluded.percentage_change,
                           turnover           = excluded.turnover,
                           updated_at         = excluded.updated_at"#,
                    params![index_id, s.last_trading_price, s.percentage_change, s.turnover, now, now],
                )?;
                Ok(RowOutcome::Written)
            },
        )?;
        report.skipped += unresolved;
        Ok(report)
    }

    // ── Floorsheet ────────────────────────────────────────────────────────────

    /// Keyed on transaction number; a conflicting row is overwritten whole.
    pub fn upsert_floorsheet(
        &self,
        trades: &[FloorsheetTrade],
        now: NaiveDateTime,
        log: &SourceLog,
    ) -> Result<UpsertReport> {
        let ids = self.stock_ids()?;
        let (resolved, unresolved) = resolve(trades, |t| ids.get(&t.symbol).copied(), |t| {
            log.warn(format!("Skipping row due to missing stock: {} ({})", t.symbol, t.transaction_no))
        });

        let mut report = self.write_batch(
            &resolved,
            |(_, t)| format!("floorsheet {}", t.transaction_no),
            log,
            |conn, (stock_id, t)| {
                conn.execute(
                    r#"INSERT INTO floorsheet
                        (transaction_no, stock_id, buyer_broker_id, sell_broker_id,
                         share_quantity, rate, amount, date, created_at, updated_at)
                       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                       ON CONFLICT (transaction_no) DO UPDATE SET
                           stock_id        = excluded.stock_id,
                           buyer_broker_id = excluded.buyer_broker_id,
                           sell_broker_id  = excluded.sell_broker_id,
                           share_quantity  = excluded.share_quantity,
                           rate            = excluded.rate,
                           amount          = excluded.amount,
                           date            = excluded.date,
                           created_at      = excluded.created_at,
                           updated_at      = excluded.updated_at"#,
                    params![
                        t.transaction_no,
                        stock_id,
                        t.buyer_broker_id,
                        t.seller_broker_id,
                        t.share_quantity,
                        t.rate,
                        t.amount,
                        t.traded_date,
                        now,
                        now,
                    ],
                )?;
                Ok(RowOutcome::Written)
            },
        )?;
        report.skipped += unresolved;
        Ok(report)
    }

    // ── EPS / PE ──────────────────────────────────────────────────────────────

    pub fn upsert_eps(&self, records: &[EpsPeRecord], now: NaiveDateTime, log: &SourceLog) -> Result<UpsertReport> {
        let ids = self.stock_ids()?;
        let (resolved, unresolved) = resolve(records, |r| ids.get(&r.symbol).copied(), |r| {
            log.warn(format!("Stock {} not found, EPS row skipped", r.symbol))
        });

        let mut report = self.write_batch(
            &resolved,
            |(_, r)| format!("EPS {}", r.symbol),
            log,
            |conn, (stock_id, r)| {
                let exists: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM stock_eps_pe WHERE stock_id = ?",
                    params![stock_id],
                    |row| row.get(0),
                )?;
                if exists > 0 {
                    conn.execute(
                        "UPDATE stock_eps_pe SET eps = ?, pe_ratio = ?, updated_at = ? WHERE stock_id = ?",
                        params![r.eps, r.pe_ratio, now, stock_id],
                    )?;
                } else {
                    conn.execute(
                        "INSERT INTO stock_eps_pe (stock_id, eps, pe_ratio, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
                        params![stock_id, r.eps, r.pe_ratio, now, now],
                    )?;
                }
                Ok(RowOutcome::Written)
            },
        )?;
        report.skipped += unresolved;
        log.info(format!("Data Inserted/Updated for EPS and PERatio: {}", report));
        Ok(report)
    }

    // ── Market status ─────────────────────────────────────────────────────────

    pub fn set_market_status(&self, is_live: bool, now: NaiveDateTime) -> Result<()> {
        self.conn
            .execute(
                r#"INSERT INTO application_config ("key", "value", created_at, updated_at)
                   VALUES (?, ?, ?, ?)
                   ON CONFLICT ("key") DO UPDATE SET
                       "value" = excluded."value",
                       updated_at = excluded.updated_at"#,
                params![MARKET_STATUS_KEY, if is_live { "1" } else { "0" }, now, now],
            )
            .context("update market status")?;
        Ok(())
    }

    pub fn market_status(&self) -> Result<Option<bool>> {
        let mut stmt = self
            .conn
            .prepare(r#"SELECT "value" FROM application_config WHERE "key" = ?"#)?;
        let mut rows = stmt.query(params![MARKET_STATUS_KEY])?;
        match rows.next()? {
            Some(row) => {
                let value: String = row.get(0)?;
                Ok(Some(value == "1"))
            }
            None => Ok(None),
        }
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    fn count(&self, table: &str) -> Result<i64> {
        let mut s = self.conn.prepare(&format!("SELECT COUNT(*) FROM {}", table))?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let mut range = self.conn.prepare("SELECT MIN(date), MAX(date) FROM floorsheet")?;
        let floorsheet_range = range.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?;
        Ok(StoreStats {
            stocks: self.count("stock")?,
            sectors: self.count("sector")?,
            news: self.count("news")?,
            news_scheduled: self.count("news WHERE notify_time IS NOT NULL")?,
            announcements: self.count("announcements")?,
            indices: self.count("live_indices_price")?,
            floorsheet: self.count("floorsheet")?,
            eps: self.count("stock_eps_pe")?,
            runs: self.count("scrape_runs")?,
            market_open: self.market_status()?,
            floorsheet_range,
        })
    }

    // ── Scrape run log ────────────────────────────────────────────────────────

    pub fn begin_scrape_run(&self, job: &str, now: NaiveDateTime) -> Result<i64> {
        let id = self.conn.query_row(
            "INSERT INTO scrape_runs (job, started_at, status) VALUES (?, ?, 'running') RETURNING id",
            params![job, now],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_scrape_run(
        &self,
        run_id: i64,
        now: NaiveDateTime,
        processed: usize,
        written: usize,
        error: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            r#"UPDATE scrape_runs SET
               finished_at = ?, status = ?,
               items_processed = ?, items_written = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                now,
                if error.is_none() { "success" } else { "error" },
                processed as i64,
                written as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn last_run(&self, job: &str) -> Result<Option<(String, NaiveDateTime)>> {
        let mut stmt = self.conn.prepare(
            "SELECT status, started_at FROM scrape_runs WHERE job = ? ORDER BY id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query(params![job])?;
        match rows.next()? {
            Some(row) => Ok(Some((row.get(0)?, row.get(1)?))),
            None => Ok(None),
        }
    }
}

/// Split rows into those whose foreign key resolves and a count of the rest.
fn resolve<'a, T>(
    rows: &'a [T],
    lookup: impl Fn(&T) -> Option<i64>,
    on_missing: impl Fn(&T),
) -> (Vec<(i64, &'a T)>, usize) {
    let mut resolved = Vec::with_capacity(rows.len());
    let mut missing = 0;
    for row in rows {
        match lookup(row) {
            Some(id) => resolved.push((id, row)),
            None => {
                on_missing(row);
                missing += 1;
            }
        }
    }
    (resolved, missing)
}

/// Uniform second inside `[start, end]` on `day`.
pub fn random_time_between<R>(day: NaiveDate, (start, end): (NaiveTime, NaiveTime), rng: &mut R) -> NaiveDateTime
where
    R: rand::Rng + ?Sized,
{
    let span = (end - start).num_seconds().max(0);
    let offset = (0..=span).choose(rng).unwrap_or(0);
    day.and_time(start) + Duration::seconds(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{self, SourceLog};
    use crate::models::NewsCategory;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tokio_test::assert_ok;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        let now = at("2026-10-18 09:00:00");
        repo.upsert_stocks(
            &[
                Stock { symbol: "ABC".into(), name: "Abc Ltd".into() },
                Stock { symbol: "NABIL".into(), name: "Nabil Bank".into() },
            ],
            now,
        )
        .unwrap();
        repo.upsert_sectors(&[Sector { index_display_name: "NEPSE Index".into() }], now).unwrap();
        repo
    }

    fn news(title: &str, link: &str, day_start: bool) -> NewsItem {
        NewsItem {
            title: title.into(),
            image: None,
            link: link.into(),
            domain: "a.b".into(),
            published_at: at("2026-10-18 08:00:00"),
            category: NewsCategory::General,
            description: String::new(),
            should_notify: true,
            is_day_start: day_start,
        }
    }

    fn trade(txn: &str, symbol: &str, rate: f64) -> FloorsheetTrade {
        FloorsheetTrade {
            transaction_no: txn.into(),
            symbol: symbol.into(),
            buyer_broker_id: 58,
            seller_broker_id: 34,
            share_quantity: 1234.0,
            rate,
            amount: 1234.0 * rate,
            traded_date: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let repo = repo();
        assert_ok!(repo.run_migrations());
        assert_eq!(repo.list_symbols().unwrap(), vec!["ABC", "NABIL"]);
    }

    #[test]
    fn news_natural_key_is_never_duplicated() {
        let repo = repo();
        let (log, _) = SourceLog::memory(logging::NEWS);
        let now = at("2026-10-18 11:45:00");
        let batch = vec![
            news("X", "https://a.b/1", true),
            news("X", "https://a.b/1", true),
            news("X", "https://a.b/2", true),
        ];

        let first = repo.insert_news(&batch, now, &log).unwrap();
        assert_eq!(first, UpsertReport { written: 2, skipped: 1, failed: 0 });

        let again = repo.insert_news(&batch, now, &log).unwrap();
        assert_eq!(again, UpsertReport { written: 0, skipped: 3, failed: 0 });
        assert_eq!(repo.stats().unwrap().news, 2);
    }

    #[test]
    fn notify_candidates_filter_by_phase() {
        let repo = repo();
        let (log, _) = SourceLog::memory(logging::NEWS);
        let now = at("2026-10-18 11:45:00");
        let mut late = news("L", "https://a.b/3", false);
        late.should_notify = true;
        let mut stale = news("S", "https://a.b/4", true);
        stale.should_notify = false;
        repo.insert_news(&[news("A", "https://a.b/1", true), late, stale], now, &log).unwrap();

        let start = repo.notify_candidates(true, false).unwrap();
        assert_eq!(start.len(), 1);
        assert_eq!(start[0].title, "A");
        assert_eq!(start[0].notify_time, None);
        assert_eq!(repo.notify_candidates(false, false).unwrap()[0].title, "L");

        repo.set_news_notify_time(start[0].id, at("2026-10-18 13:30:00")).unwrap();
        assert_eq!(repo.notify_candidates(true, false).unwrap()[0].notify_time, Some(at("2026-10-18 13:30:00")));
        assert!(repo.notify_candidates(true, true).unwrap().is_empty());
    }

    #[test]
    fn announcements_dedupe_and_schedule_today() {
        let repo = repo();
        let (log, lines) = SourceLog::memory(logging::ANNOUNCEMENTS);
        let now = at("2026-10-18 10:30:00");
        let today = now.date();
        let item = |symbol: &str, date: NaiveDate, text: &str| AnnouncementItem {
            symbol: symbol.into(),
            date,
            text: text.into(),
            should_notify: date == today,
        };
        let batch = vec![
            item("NABIL", today, "AGM"),
            item("NABIL", today, "AGM"),
            item("NABIL", today.pred_opt().unwrap(), "AGM"),
            item("ZZZ", today, "Ghost"),
        ];
        let mut rng = StdRng::seed_from_u64(7);

        let report = repo
            .insert_announcements(&batch, now, (hm(11, 0), hm(18, 0)), &mut rng, &log)
            .unwrap();
        assert_eq!(report, UpsertReport { written: 2, skipped: 2, failed: 0 });
        assert!(lines.contains("Stock ID for ZZZ not found"));

        let times: Vec<Option<NaiveDateTime>> = repo
            .conn
            .prepare("SELECT notify_time FROM announcements ORDER BY date DESC")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        let scheduled = times[0].unwrap();
        assert_eq!(scheduled.date(), today);
        assert!(scheduled.time() >= hm(11, 0) && scheduled.time() <= hm(18, 0));
        assert_eq!(times[1], None);
    }

    #[test]
    fn index_upsert_keeps_created_at() {
        let repo = repo();
        let (log, _) = SourceLog::memory(logging::INDICES);
        let snap = IndexSnapshot {
            index_name: "NEPSE Index".into(),
            last_trading_price: 2745.31,
            percentage_change: 1.25,
            turnover: 4_512_300.1,
        };
        let unknown = IndexSnapshot { index_name: "Nowhere".into(), ..snap.clone() };

        let r1 = repo.upsert_index_snapshots(&[snap.clone(), unknown], at("2026-10-18 11:01:00"), &log).unwrap();
        assert_eq!(r1, UpsertReport { written: 1, skipped: 1, failed: 0 });
        let newer = IndexSnapshot { last_trading_price: 2750.0, ..snap };
        repo.upsert_index_snapshots(&[newer], at("2026-10-18 11:02:00"), &log).unwrap();

        let (price, created, updated): (f64, NaiveDateTime, NaiveDateTime) = repo
            .conn
            .query_row(
                "SELECT last_trading_price, created_at, updated_at FROM live_indices_price",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(price, 2750.0);
        assert_eq!(created, at("2026-10-18 11:01:00"));
        assert_eq!(updated, at("2026-10-18 11:02:00"));
        assert_eq!(repo.stats().unwrap().indices, 1);
    }

    #[test]
    fn floorsheet_overwrites_on_transaction_no() {
        let repo = repo();
        let (log, _) = SourceLog::memory(logging::FLOORSHEET);
        let now = at("2026-10-18 19:00:00");

        repo.upsert_floorsheet(&[trade("T1", "NABIL", 850.50), trade("T2", "GHOST", 1.0)], now, &log).unwrap();
        let report = repo.upsert_floorsheet(&[trade("T1", "NABIL", 851.0)], now, &log).unwrap();
        assert_eq!(report.written, 1);

        let (count, rate): (i64, f64) = repo
            .conn
            .query_row("SELECT COUNT(*), MAX(rate) FROM floorsheet", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!((count, rate), (1, 851.0));
    }

    #[test]
    fn failing_row_does_not_lose_the_batch() {
        let repo = repo();
        let (log, lines) = SourceLog::memory(logging::FLOORSHEET);
        let rows = vec!["ok-1", "bad", "ok-2"];

        let report = repo
            .write_batch(&rows, |r| r.to_string(), &log, |conn, r| {
                if *r == "bad" {
                    conn.execute("INSERT INTO no_such_table VALUES (1)", [])?;
                }
                conn.execute(
                    r#"INSERT INTO application_config ("key", "value", created_at, updated_at)
                       VALUES (?, 'x', current_timestamp, current_timestamp)"#,
                    params![r],
                )?;
                Ok(RowOutcome::Written)
            })
            .unwrap();

        assert_eq!(report, UpsertReport { written: 2, skipped: 0, failed: 1 });
        assert!(lines.contains("Could not write bad"));
        assert_eq!(repo.count("application_config").unwrap(), 2);
    }

    #[test]
    fn eps_updates_existing_and_skips_unknown() {
        let repo = repo();
        let (log, lines) = SourceLog::memory(logging::EPS);
        let rec = |s: &str, eps: f64, pe: f64| EpsPeRecord { symbol: s.into(), eps, pe_ratio: pe };

        let r1 = repo
            .upsert_eps(&[rec("ABC", 0.0, 12.5), rec("XYZ", 1.0, 1.0)], at("2026-10-18 18:00:00"), &log)
            .unwrap();
        assert_eq!(r1, UpsertReport { written: 1, skipped: 1, failed: 0 });
        assert!(lines.contains("Stock XYZ not found"));

        repo.upsert_eps(&[rec("ABC", 3.2, 11.0)], at("2026-10-19 18:00:00"), &log).unwrap();
        let (eps, pe): (f64, f64) = repo
            .conn
            .query_row("SELECT eps, pe_ratio FROM stock_eps_pe", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!((eps, pe), (3.2, 11.0));
        assert_eq!(repo.stats().unwrap().eps, 1);
    }

    #[test]
    fn market_status_is_one_overwritten_row() {
        let repo = repo();
        assert_eq!(repo.market_status().unwrap(), None);
        repo.set_market_status(true, at("2026-10-18 10:55:00")).unwrap();
        repo.set_market_status(false, at("2026-10-18 15:05:00")).unwrap();
        assert_eq!(repo.market_status().unwrap(), Some(false));
        assert_eq!(repo.count("application_config").unwrap(), 1);
    }

    #[test]
    fn scrape_runs_are_recorded() {
        let repo = repo();
        let id = repo.begin_scrape_run("eps", at("2026-10-18 18:00:00")).unwrap();
        repo.finish_scrape_run(id, at("2026-10-18 18:02:00"), 10, 9, None).unwrap();
        let (status, started) = repo.last_run("eps").unwrap().unwrap();
        assert_eq!(status, "success");
        assert_eq!(started, at("2026-10-18 18:00:00"));
        assert_eq!(repo.last_run("news").unwrap(), None);
    }

    #[test]
    fn missing_database_is_classified() {
        let path = std::env::temp_dir().join("nepse_feed_missing_dir").join("none.duckdb");
        assert!(matches!(Repository::open_existing(&path), Err(StorageError::MissingDatabase(_))));
    }

    #[test]
    fn random_time_stays_in_window() {
        let mut rng = StdRng::seed_from_u64(1);
        let day = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        for _ in 0..50 {
            let t = random_time_between(day, (hm(11, 0), hm(18, 0)), &mut rng);
            assert_eq!(t.date(), day);
            assert!(t.time() >= hm(11, 0) && t.time() <= hm(18, 0));
        }
    }
}
