use crate::logging::SourceLog;
use crate::models::{EpsPeRecord, RawEpsRow};

use super::cleaner;
use super::parsers;
use super::session::{ExtractError, PageSession, navigate_with_retry};
use super::sites::EpsTable;
use super::DriverOptions;

fn column(headers: &[String], name: &str) -> Result<usize, ExtractError> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| ExtractError::MissingElement(format!("column {:?}", name)))
}

/// Pick the symbol/EPS/PE columns out of the full table.
pub fn filter_rows(
    headers: &[String],
    rows: &[Vec<String>],
    table: &EpsTable,
    log: &SourceLog,
) -> Result<Vec<EpsPeRecord>, ExtractError> {
    let symbol = column(headers, table.symbol_column)?;
    let eps = column(headers, table.eps_column)?;
    let pe = column(headers, table.pe_column)?;

    let mut records = Vec::new();
    for cells in rows {
        let raw = RawEpsRow {
            symbol: cells.get(symbol).cloned(),
            eps: cells.get(eps).cloned(),
            pe_ratio: cells.get(pe).cloned(),
        };
        match cleaner::eps_record(&raw) {
            Ok(record) => records.push(record),
            Err(e) => log.warn(format!("Skipping EPS row {:?}: {}", cells, e)),
        }
    }
    Ok(records)
}

/// Load the stock filter, switch it to its largest page size and read it.
pub async fn scrape_eps(
    session: &dyn PageSession,
    table: &EpsTable,
    opts: &DriverOptions,
    log: &SourceLog,
) -> Result<Vec<EpsPeRecord>, ExtractError> {
    log.info("Starting the web scraping process...");
    navigate_with_retry(session, &table.url, opts.navigation_retries).await?;
    log.info("Opened the URL in the browser.");

    session.wait_for(table.headers, opts.wait).await?;
    session.wait_for(table.rows, opts.wait).await?;
    log.info("Table loaded.");

    session.click(table.page_size_dropdown).await?;
    session.pause(opts.settle).await;
    let html = session.content().await?;
    let options = parsers::extract_texts(&html, table.page_size_options)?;
    let last = options
        .len()
        .checked_sub(1)
        .ok_or_else(|| ExtractError::MissingElement(table.page_size_options.to_string()))?;
    session.click_nth(table.page_size_options, last).await?;
    session.pause(opts.settle).await;
    log.info(format!("Selected page size {}", options[last]));

    let html = session.content().await?;
    let headers: Vec<String> = parsers::extract_texts(&html, table.headers)?
        .into_iter()
        .map(|h| h.replace("arrow_upward", "").trim().to_string())
        .collect();
    let rows = parsers::extract_rows(&html, table.rows, 0)?;
    log.info(format!("Extracted {} rows from the table.", rows.len()));

    filter_rows(&headers, &rows, table, log)
}
