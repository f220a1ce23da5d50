use crate::models::{
    AnnouncementItem, EpsPeRecord, FloorsheetTrade, IndexSnapshot, NewsCategory, RawAnnouncementRow,
    RawEpsRow, RawFloorsheetRow, RawIndexCard, RawNewsItem,
};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("missing field `{0}`")]
    Missing(&'static str),

    #[error("unparseable date {0:?}")]
    Date(String),

    #[error("unparseable number {value:?} in `{field}`")]
    Number { field: &'static str, value: String },
}

pub const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const IMAGE_EXTENSIONS: [&str; 6] = [".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp"];

const DATE_FORMATS: [&str; 9] = [
    "%Y-%m-%d", "%Y/%m/%d", "%b %d %Y", "%B %d %Y", "%d %b %Y", "%d %B %Y", "%m/%d/%Y",
    "%d/%m/%Y", "%d-%m-%Y",
];

const TIME_FORMATS: [&str; 6] = ["%H:%M:%S", "%H:%M", "%I:%M:%S %p", "%I:%M %p", "%I:%M%p", "%I %p"];

const WEEKDAYS: [&str; 14] = [
    "mon", "tue", "wed", "thu", "fri", "sat", "sun", "monday", "tuesday", "wednesday",
    "thursday", "friday", "saturday", "sunday",
];

// ── Dates ─────────────────────────────────────────────────────────────────────

/// Parse a date/time the way listing pages print them, ignoring surrounding
/// noise such as weekday names, ordinals, commas and trailing labels.
/// "Friday, October 16th, 2026" | "Oct 17, 2026 02:41 PM" | "2026-10-18 09:05"
pub fn parse_fuzzy_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }

    let tokens = fuzzy_tokens(s);

    // Longest date run first, anywhere in the string; the time, if any,
    // follows it directly.
    for len in (1..=tokens.len().min(3)).rev() {
        for start in 0..=tokens.len() - len {
            let candidate = tokens[start..start + len].join(" ");
            let Some(date) = parse_date_only(&candidate) else { continue };
            let time = parse_time_prefix(&tokens[start + len..]).unwrap_or(NaiveTime::MIN);
            return Some(date.and_time(time));
        }
    }
    None
}

fn fuzzy_tokens(s: &str) -> Vec<String> {
    s.replace([',', '|'], " ")
        .split_whitespace()
        .filter(|t| !WEEKDAYS.contains(&t.to_lowercase().trim_end_matches('.')))
        .map(strip_ordinal)
        .collect()
}

/// "16th" → "16"; anything else unchanged.
fn strip_ordinal(token: &str) -> String {
    let lower = token.to_lowercase();
    for suffix in ["st", "nd", "rd", "th"] {
        if let Some(num) = lower.strip_suffix(suffix) {
            if !num.is_empty() && num.chars().all(|c| c.is_ascii_digit()) {
                return num.to_string();
            }
        }
    }
    token.to_string()
}

fn parse_date_only(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

fn parse_time_prefix(tokens: &[String]) -> Option<NaiveTime> {
    for len in (1..=tokens.len().min(2)).rev() {
        let candidate = tokens[..len].join(" ");
        if let Some(t) = TIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveTime::parse_from_str(&candidate, fmt).ok())
        {
            return Some(t);
        }
    }
    None
}

pub fn canonical(dt: &NaiveDateTime) -> String {
    dt.format(CANONICAL_FORMAT).to_string()
}

/// Announcement tables print ISO dates; fall back to the fuzzy parser.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_fuzzy_datetime(s).map(|dt| dt.date()))
}

// ── Flags ─────────────────────────────────────────────────────────────────────

/// True iff the item is dated on the ingestion calendar day.
pub fn should_notify(item_date: NaiveDate, ingestion_date: NaiveDate) -> bool {
    item_date == ingestion_date
}

/// True iff ingestion runs during the day-start check hour.
pub fn is_day_start(now: NaiveDateTime, day_start_hour: u32) -> bool {
    now.hour() == day_start_hour
}

// ── Numbers ───────────────────────────────────────────────────────────────────

/// Strict numeric parse with thousands separators removed.
/// "1,234" → 1234.0 | "850.50" → 850.5 | "abc" → None
pub fn parse_number(s: &str) -> Option<f64> {
    let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Placeholder text ("NaN", "", "-") reads as zero.
pub fn parse_number_or_zero(s: &str) -> f64 {
    parse_number(s).unwrap_or(0.0)
}

fn required<'a>(field: &'static str, value: &'a Option<String>) -> Result<&'a str, NormalizeError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(NormalizeError::Missing(field))
}

fn strict_number(field: &'static str, value: &Option<String>) -> Result<f64, NormalizeError> {
    let raw = required(field, value)?;
    parse_number(raw).ok_or_else(|| NormalizeError::Number { field, value: raw.to_string() })
}

/// Empty reads as zero, anything else must parse.
fn lenient_number(field: &'static str, value: Option<&str>) -> Result<f64, NormalizeError> {
    match value.map(str::trim) {
        None | Some("") => Ok(0.0),
        Some(raw) => parse_number(raw).ok_or_else(|| NormalizeError::Number { field, value: raw.to_string() }),
    }
}

pub fn normalise_symbol(s: &str) -> String {
    s.trim().to_uppercase()
}

// ── News ──────────────────────────────────────────────────────────────────────

/// First `max_sentences` segments split on `delimiter`, with "..." appended
/// when anything was cut. Empty text gives an empty summary.
pub fn build_summary(text: &str, delimiter: &str, max_sentences: usize) -> String {
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }
    let segments: Vec<&str> = text.split(delimiter).collect();
    let mut summary = segments[..segments.len().min(max_sentences)].join(delimiter);
    if segments.len() > max_sentences {
        summary.push_str("...");
    }
    summary
}

/// Keep only URLs whose path ends in an image extension.
pub fn image_url(raw: Option<&str>) -> Option<String> {
    let raw = raw?.trim();
    let path = Url::parse(raw).map(|u| u.path().to_lowercase()).ok()?;
    IMAGE_EXTENSIONS
        .iter()
        .any(|ext| path.ends_with(ext))
        .then(|| raw.to_string())
}

pub fn domain_of(link: &str) -> Option<String> {
    Url::parse(link).ok()?.host_str().map(|h| h.to_string())
}

pub fn news_item(
    raw: &RawNewsItem,
    description: &str,
    delimiter: &str,
    category: NewsCategory,
    now: NaiveDateTime,
    day_start_hour: u32,
) -> Result<crate::models::NewsItem, NormalizeError> {
    let title = required("title", &raw.title)?;
    let link = required("link", &raw.link)?;
    let date_text = required("date", &raw.date)?;
    let published_at =
        parse_fuzzy_datetime(date_text).ok_or_else(|| NormalizeError::Date(date_text.to_string()))?;

    Ok(crate::models::NewsItem {
        title: title.to_string(),
        image: image_url(raw.image.as_deref()),
        link: link.to_string(),
        domain: domain_of(link).unwrap_or_default(),
        published_at,
        category,
        description: build_summary(description, delimiter, 3),
        should_notify: should_notify(published_at.date(), now.date()),
        is_day_start: is_day_start(now, day_start_hour),
    })
}

// ── Announcements ─────────────────────────────────────────────────────────────

pub fn announcement(
    symbol: &str,
    raw: &RawAnnouncementRow,
    today: NaiveDate,
) -> Result<AnnouncementItem, NormalizeError> {
    let date_text = required("date", &raw.date)?;
    let date = parse_date(date_text).ok_or_else(|| NormalizeError::Date(date_text.to_string()))?;
    let text = required("announcement", &raw.text)?;

    Ok(AnnouncementItem {
        symbol: normalise_symbol(symbol),
        date,
        text: text.to_string(),
        should_notify: should_notify(date, today),
    })
}

// ── Index snapshot ────────────────────────────────────────────────────────────

/// "1.25% ▲" → "1.25"
fn percent_text(s: &str) -> &str {
    s.split('%').next().unwrap_or("").trim()
}

pub fn index_snapshot(card: &RawIndexCard) -> Result<IndexSnapshot, NormalizeError> {
    Ok(IndexSnapshot {
        index_name: card.index_name.clone(),
        turnover: lenient_number("turnover", card.turnover.as_deref())?,
        last_trading_price: lenient_number("last_trading_index", card.value.as_deref())?,
        percentage_change: lenient_number("percentage_change", card.percent.as_deref().map(percent_text))?,
    })
}

// ── Floorsheet ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloorsheetColumn {
    TransactionNo,
    Symbol,
    BuyerBroker,
    SellerBroker,
    ShareQuantity,
    Rate,
    Amount,
    TradedDate,
}

/// Map a table header ("Transact. No.", "Rate (Rs)", ...) to its column.
pub fn floorsheet_column(header: &str) -> Option<FloorsheetColumn> {
    let h = header
        .to_lowercase()
        .replace(" (in rs)", "")
        .replace(" (rs)", "");
    let h = h.trim();

    if h.starts_with("transact") {
        Some(FloorsheetColumn::TransactionNo)
    } else if h.contains("symbol") {
        Some(FloorsheetColumn::Symbol)
    } else if h.starts_with("buyer") {
        Some(FloorsheetColumn::BuyerBroker)
    } else if h.starts_with("sell") {
        Some(FloorsheetColumn::SellerBroker)
    } else if h.contains("quantity") {
        Some(FloorsheetColumn::ShareQuantity)
    } else if h == "rate" {
        Some(FloorsheetColumn::Rate)
    } else if h == "amount" {
        Some(FloorsheetColumn::Amount)
    } else if h.contains("date") {
        Some(FloorsheetColumn::TradedDate)
    } else {
        None
    }
}

pub fn raw_floorsheet_row(columns: &[Option<FloorsheetColumn>], cells: &[String]) -> RawFloorsheetRow {
    let mut row = RawFloorsheetRow::default();
    for (column, cell) in columns.iter().zip(cells) {
        let value = Some(cell.trim().to_string());
        match column {
            Some(FloorsheetColumn::TransactionNo) => row.transaction_no = value,
            Some(FloorsheetColumn::Symbol) => row.symbol = value,
            Some(FloorsheetColumn::BuyerBroker) => row.buyer_broker = value,
            Some(FloorsheetColumn::SellerBroker) => row.seller_broker = value,
            Some(FloorsheetColumn::ShareQuantity) => row.share_quantity = value,
            Some(FloorsheetColumn::Rate) => row.rate = value,
            Some(FloorsheetColumn::Amount) => row.amount = value,
            Some(FloorsheetColumn::TradedDate) => row.traded_date = value,
            None => {}
        }
    }
    row
}

fn broker_id(field: &'static str, value: &Option<String>) -> Result<i64, NormalizeError> {
    let raw = required(field, value)?;
    raw.replace(',', "")
        .parse::<i64>()
        .map_err(|_| NormalizeError::Number { field, value: raw.to_string() })
}

/// Every numeric field must parse; a bad cell fails the whole row.
/// `fallback_date` is the date the table was filtered on.
pub fn floorsheet_trade(
    raw: &RawFloorsheetRow,
    fallback_date: NaiveDate,
) -> Result<FloorsheetTrade, NormalizeError> {
    let traded_date = match raw.traded_date.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(text) => parse_date(text).ok_or_else(|| NormalizeError::Date(text.to_string()))?,
        None => fallback_date,
    };

    Ok(FloorsheetTrade {
        transaction_no: required("transaction_no", &raw.transaction_no)?.to_string(),
        symbol: normalise_symbol(required("symbol", &raw.symbol)?),
        buyer_broker_id: broker_id("buyer_broker", &raw.buyer_broker)?,
        seller_broker_id: broker_id("seller_broker", &raw.seller_broker)?,
        share_quantity: strict_number("share_quantity", &raw.share_quantity)?,
        rate: strict_number("rate", &raw.rate)?,
        amount: strict_number("amount", &raw.amount)?,
        traded_date,
    })
}

// ── EPS / PE ──────────────────────────────────────────────────────────────────

pub fn eps_record(raw: &RawEpsRow) -> Result<EpsPeRecord, NormalizeError> {
    let symbol = required("symbol", &raw.symbol)?;
    Ok(EpsPeRecord {
        symbol: normalise_symbol(symbol),
        eps: parse_number_or_zero(raw.eps.as_deref().unwrap_or("")),
        pe_ratio: parse_number_or_zero(raw.pe_ratio.as_deref().unwrap_or("")),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
