use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

// ── News ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NewsCategory {
    Ipo,
    DividendRightBonus,
    General,
    FinancialAnalysis,
    ListedShares,
}

impl NewsCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NewsCategory::Ipo => "ipo",
            NewsCategory::DividendRightBonus => "dividend/right/bonus",
            NewsCategory::General => "general",
            NewsCategory::FinancialAnalysis => "financial analysis",
            NewsCategory::ListedShares => "listed shares",
        }
    }
}

impl fmt::Display for NewsCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A listing entry as read off the page, before the detail page is visited.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawNewsItem {
    pub title: Option<String>,
    pub image: Option<String>,
    pub link: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsItem {
    pub title: String,
    pub image: Option<String>,
    pub link: String,
    pub domain: String,
    pub published_at: NaiveDateTime,
    pub category: NewsCategory,
    pub description: String,
    pub should_notify: bool,
    pub is_day_start: bool,
}

/// Row id + notify eligibility, as read back for scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyCandidate {
    pub id: i64,
    pub title: String,
    pub notify_time: Option<NaiveDateTime>,
}

// ── Announcements ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RawAnnouncementRow {
    pub date: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnnouncementItem {
    pub symbol: String,
    pub date: NaiveDate,
    pub text: String,
    pub should_notify: bool,
}

// ── Index snapshot ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexSnapshot {
    pub index_name: String,
    pub last_trading_price: f64,
    pub percentage_change: f64,
    pub turnover: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RawIndexCard {
    pub index_name: String,
    pub turnover: Option<String>,
    pub value: Option<String>,
    pub percent: Option<String>,
}

// ── Floorsheet ────────────────────────────────────────────────────────────────

/// One floorsheet table row, keyed by the normalised column header.
#[derive(Debug, Clone, Default)]
pub struct RawFloorsheetRow {
    pub transaction_no: Option<String>,
    pub symbol: Option<String>,
    pub buyer_broker: Option<String>,
    pub seller_broker: Option<String>,
    pub share_quantity: Option<String>,
    pub rate: Option<String>,
    pub amount: Option<String>,
    pub traded_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FloorsheetTrade {
    pub transaction_no: String,
    pub symbol: String,
    pub buyer_broker_id: i64,
    pub seller_broker_id: i64,
    pub share_quantity: f64,
    pub rate: f64,
    pub amount: f64,
    pub traded_date: NaiveDate,
}

// ── EPS / PE ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RawEpsRow {
    pub symbol: Option<String>,
    pub eps: Option<String>,
    pub pe_ratio: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpsPeRecord {
    pub symbol: String,
    pub eps: f64,
    pub pe_ratio: f64,
}

// ── Reference data ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stock {
    pub symbol: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sector {
    pub index_display_name: String,
}

// ── Write accounting ──────────────────────────────────────────────────────────

/// Per-batch outcome of an upsert call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl UpsertReport {
    pub fn merge(&mut self, other: UpsertReport) {
        self.written += other.written;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

impl fmt::Display for UpsertReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} written, {} skipped, {} failed",
            self.written, self.skipped, self.failed
        )
    }
}
