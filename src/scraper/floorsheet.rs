//! Floorsheet driver.
//!
//! For each day in the window the form is driven through an explicit step
//! sequence; every result page is handed to the sink as soon as it is read.

use crate::logging::SourceLog;
use crate::models::{FloorsheetTrade, UpsertReport};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use thiserror::Error;

use super::cleaner::{self, floorsheet_column};
use super::parsers;
use super::session::{ExtractError, PageSession, SessionFactory, navigate_with_retry};
use super::sites::FloorsheetPage;
use super::DriverOptions;

/// Where extracted pages go. Implemented by the repository.
#[async_trait]
pub trait TradeSink: Send + Sync {
    async fn save(&self, trades: &[FloorsheetTrade]) -> anyhow::Result<UpsertReport>;
}

#[derive(Debug, Error)]
enum DayError {
    #[error("stock '{0}' not found")]
    StockNotFound(String),

    #[error(transparent)]
    Extract(#[from] ExtractError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    SelectStock,
    SetDate,
    Submit,
    ExtractPage(u32),
    Done,
}

/// Days to visit, newest first: today and the `days - 1` before it.
pub fn window(today: NaiveDate, days: u32) -> Vec<NaiveDate> {
    (0..days as i64).map(|back| today - Duration::days(back)).collect()
}

/// Option labels look like "Nabil Bank Limited / NABIL".
fn option_matches(label: &str, symbol: &str) -> bool {
    label.rsplit('/').next().map(str::trim) == Some(symbol)
}

fn has_next(html: &str, page: &FloorsheetPage) -> Result<bool, ExtractError> {
    Ok(match parsers::extract_attr(html, page.next, "class")? {
        Some(class) => !class.contains("disabled"),
        None => parsers::extract_text(html, page.next)?.is_some(),
    })
}

/// Trades on the current page and the number of rows that failed to parse.
fn read_page(
    html: &str,
    page: &FloorsheetPage,
    day: NaiveDate,
    log: &SourceLog,
) -> Result<(Vec<FloorsheetTrade>, usize), ExtractError> {
    // First header and first cell are the row number.
    let columns: Vec<_> = parsers::extract_texts(html, page.headers)?
        .iter()
        .skip(1)
        .map(|h| floorsheet_column(h))
        .collect();

    let mut trades = Vec::new();
    let mut failed = 0;
    for cells in parsers::extract_rows(html, page.rows, 1)? {
        let raw = cleaner::raw_floorsheet_row(&columns, &cells);
        match cleaner::floorsheet_trade(&raw, day) {
            Ok(trade) => trades.push(trade),
            Err(e) => {
                log.warn(format!("Skipping floorsheet row {:?}: {}", cells, e));
                failed += 1;
            }
        }
    }
    Ok((trades, failed))
}

struct DayRun<'a> {
    session: &'a dyn PageSession,
    page: &'a FloorsheetPage,
    symbol: &'a str,
    opts: &'a DriverOptions,
    sink: &'a dyn TradeSink,
    log: &'a SourceLog,
}

impl DayRun<'_> {
    async fn select_stock(&self) -> Result<(), DayError> {
        self.log.info(format!("Selecting stock: {}", self.symbol));
        self.session.click(self.page.stock_picker).await?;
        self.session.pause(self.opts.settle).await;
        self.session.type_into(self.page.stock_search, self.symbol).await?;
        self.session.pause(self.opts.settle).await;
        self.session.wait_for(self.page.stock_options, self.opts.wait).await?;

        let html = self.session.content().await?;
        let labels = parsers::extract_texts(&html, self.page.stock_options)?;
        let index = labels
            .iter()
            .position(|label| option_matches(label, self.symbol))
            .ok_or_else(|| DayError::StockNotFound(self.symbol.to_string()))?;
        self.session.click_nth(self.page.stock_options, index).await?;
        self.session.pause(self.opts.settle).await;
        Ok(())
    }

    async fn run(&self, day: NaiveDate) -> Result<UpsertReport, DayError> {
        let date = day.format("%Y-%m-%d").to_string();
        let mut report = UpsertReport::default();
        let mut step = Step::SelectStock;

        loop {
            step = match step {
                Step::SelectStock => {
                    self.select_stock().await?;
                    Step::SetDate
                }
                Step::SetDate => {
                    self.session.set_value(self.page.date_input, "").await?;
                    self.session.type_into(self.page.date_input, &date).await?;
                    self.log.info(format!("Date set to: {}", date));
                    Step::Submit
                }
                Step::Submit => {
                    self.session.click(self.page.submit).await?;
                    self.session.pause(self.opts.settle).await;
                    self.session
                        .set_value(self.page.page_length, self.page.page_length_value)
                        .await?;
                    self.session.pause(self.opts.settle).await;
                    Step::ExtractPage(1)
                }
                Step::ExtractPage(n) => {
                    let html = self.session.content().await?;
                    let (trades, failed) = read_page(&html, self.page, day, self.log)?;
                    report.failed += failed;
                    if !trades.is_empty() {
                        match self.sink.save(&trades).await {
                            Ok(saved) => report.merge(saved),
                            Err(e) => {
                                self.log.error(format!("Saving page {} for {} on {} failed: {:#}", n, self.symbol, date, e));
                                report.failed += trades.len();
                            }
                        }
                        self.log.info(format!("Data extracted for {} on {} (page {})", self.symbol, date, n));
                    }

                    let more = has_next(&html, self.page)?;
                    if more && n >= self.opts.max_pages {
                        self.log.warn(format!("Stopped {} on {} after {} pages", self.symbol, date, n));
                    }
                    if !more || n >= self.opts.max_pages {
                        Step::Done
                    } else {
                        self.session.click(self.page.next).await?;
                        self.session.pause(self.opts.settle).await;
                        Step::ExtractPage(n + 1)
                    }
                }
                Step::Done => break,
            };
        }
        Ok(report)
    }
}

/// Walk `days` calendar days back from `today` for one stock.
///
/// A failed day is logged and the next day is tried; a stock missing from the
/// picker ends the stock.
pub async fn scrape_stock(
    session: &dyn PageSession,
    page: &FloorsheetPage,
    symbol: &str,
    today: NaiveDate,
    days: u32,
    opts: &DriverOptions,
    sink: &dyn TradeSink,
    log: &SourceLog,
) -> Result<UpsertReport, ExtractError> {
    navigate_with_retry(session, &page.url, opts.navigation_retries).await?;
    session.pause(opts.settle).await;

    let run = DayRun { session, page, symbol, opts, sink, log };
    let mut total = UpsertReport::default();

    for day in window(today, days) {
        match run.run(day).await {
            Ok(report) => total.merge(report),
            Err(DayError::StockNotFound(s)) => {
                log.warn(format!("Stock '{}' not found", s));
                break;
            }
            Err(DayError::Extract(e)) => {
                log.error(format!("An error occurred while processing {} on {}: {}", symbol, day, e));
            }
        }
    }
    Ok(total)
}

/// Every symbol in its own browser session.
pub async fn scrape_symbols(
    factory: &dyn SessionFactory,
    page: &FloorsheetPage,
    symbols: &[String],
    today: NaiveDate,
    days: u32,
    opts: &DriverOptions,
    sink: &dyn TradeSink,
    log: &SourceLog,
) -> UpsertReport {
    let mut total = UpsertReport::default();
    for symbol in symbols {
        log.info(format!("Starting scraping for stock: {}", symbol));
        let result = match factory.open().await {
            Ok(session) => scrape_stock(session.as_ref(), page, symbol, today, days, opts, sink, log).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(report) => {
                log.info(format!("{}: {}", symbol, report));
                total.merge(report);
            }
            Err(e) => log.error(format!("An error occurred while processing {}: {}", symbol, e)),
        }
        log.info(format!("Browser closed for stock: {}", symbol));
    }
    total
}
