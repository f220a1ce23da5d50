use crate::logging::SourceLog;
use crate::models::IndexSnapshot;
use std::time::Duration;

use super::cleaner;
use super::parsers;
use super::session::{ExtractError, PageSession, navigate_with_retry};
use super::sites::IndexWidget;
use super::DriverOptions;

const NEXT_WAIT: Duration = Duration::from_secs(10);

/// Look for `name` in the visible slides, advancing the slider until it shows
/// up, the next control disappears, or `max_pages` slides have been tried.
async fn find_index(
    session: &dyn PageSession,
    widget: &IndexWidget,
    name: &str,
    opts: &DriverOptions,
) -> Result<Option<IndexSnapshot>, ExtractError> {
    for _ in 0..opts.max_pages {
        let html = session.content().await?;
        if let Some(card) = parsers::find_index_card(&html, widget, name)? {
            return cleaner::index_snapshot(&card)
                .map(Some)
                .map_err(|e| ExtractError::MissingElement(format!("{}: {}", name, e)));
        }
        if session.wait_for(widget.next, NEXT_WAIT.min(opts.wait)).await.is_err() {
            return Ok(None);
        }
        session.click(widget.next).await?;
        session.pause(opts.settle).await;
    }
    Ok(None)
}

/// Snapshot every tracked index currently shown by the live widget.
pub async fn scrape_indices(
    session: &dyn PageSession,
    widget: &IndexWidget,
    names: &[&str],
    opts: &DriverOptions,
    log: &SourceLog,
) -> Result<Vec<IndexSnapshot>, ExtractError> {
    navigate_with_retry(session, &widget.url, opts.navigation_retries).await?;
    session.wait_for(widget.viewport, opts.wait).await?;

    let mut snapshots = Vec::new();
    for name in names {
        match find_index(session, widget, name, opts).await {
            Ok(Some(snap)) => {
                log.info(format!(
                    "Index Name: {}, Turnover: {}, Last Trading Index: {}, Percentage Change: {}",
                    snap.index_name, snap.turnover, snap.last_trading_price, snap.percentage_change
                ));
                snapshots.push(snap);
            }
            Ok(None) => log.warn(format!("Index '{}' not found in widget", name)),
            Err(e) => log.error(format!("Error extracting data for '{}': {}", name, e)),
        }
    }
    log.info(format!("Data extracted for {} of {} indices", snapshots.len(), names.len()));
    Ok(snapshots)
}
