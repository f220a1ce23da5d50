//! News listing driver.
//!
//! Pages through a listing until the trailing window is exhausted, then visits
//! each retained item's detail page for its summary.

use crate::logging::SourceLog;
use crate::models::{NewsItem, RawNewsItem};
use chrono::{Duration, NaiveDateTime};
use std::collections::HashSet;

use super::cleaner::{self, parse_fuzzy_datetime};
use super::parsers;
use super::session::{ExtractError, PageSession, SessionFactory, navigate_with_retry};
use super::sites::{NewsListing, Pagination, SetupStep};
use super::DriverOptions;

#[derive(Debug, Clone, Copy)]
pub struct NewsWindow {
    pub now: NaiveDateTime,
    pub days: i64,
    pub day_start_hour: u32,
}

impl NewsWindow {
    pub fn cutoff(&self) -> NaiveDateTime {
        self.now - Duration::days(self.days)
    }
}

async fn run_setup(
    session: &dyn PageSession,
    steps: &[SetupStep],
    opts: &DriverOptions,
    log: &SourceLog,
) -> Result<(), ExtractError> {
    for step in steps {
        match step {
            SetupStep::Select { selector, value } => {
                session.set_value(selector, value).await?;
                log.info(format!("Selected {} in {}", value, selector));
            }
            SetupStep::Click(selector) => {
                session.click(selector).await?;
                log.info(format!("Clicked {}", selector));
            }
        }
        session.pause(opts.settle).await;
    }
    Ok(())
}

/// Collect listing entries, newest first, until one of:
/// the page has no items, nothing on it is new, its last item predates the
/// cutoff, there is no pagination control, or `max_pages` is reached.
pub async fn collect_listing(
    session: &dyn PageSession,
    listing: &NewsListing,
    cutoff: NaiveDateTime,
    opts: &DriverOptions,
    log: &SourceLog,
) -> Result<Vec<RawNewsItem>, ExtractError> {
    navigate_with_retry(session, &listing.url, opts.navigation_retries).await?;
    log.info(format!("Page loaded: {}", listing.url));
    run_setup(session, &listing.setup, opts, log).await?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut collected = Vec::new();
    let mut page_url = listing.url.clone();
    let mut page = 1u32;

    loop {
        if session.wait_for(listing.item, opts.listing_wait).await.is_err() {
            log.info(format!("No items on page {} of {}", page, listing.url));
            break;
        }
        let html = session.content().await?;
        let items = parsers::extract_news_items(&html, listing, &page_url)?;
        if items.is_empty() {
            break;
        }

        let fresh: Vec<RawNewsItem> = items
            .into_iter()
            .filter(|item| item.link.as_ref().is_some_and(|link| seen.insert(link.clone())))
            .collect();
        if fresh.is_empty() {
            break;
        }

        let last_date = fresh
            .last()
            .and_then(|item| item.date.as_deref())
            .and_then(parse_fuzzy_datetime);
        collected.extend(fresh);

        if last_date.is_some_and(|d| d < cutoff) {
            break;
        }
        if page >= opts.max_pages {
            log.warn(format!("Stopped {} after {} pages", listing.url, page));
            break;
        }

        match listing.pagination {
            Pagination::LoadMore(selector) => {
                if !session.exists(selector).await? {
                    break;
                }
                session.click(selector).await?;
                session.pause(opts.settle).await;
            }
            Pagination::NextLink(selector) => {
                let Some(next) = parsers::extract_attr(&html, selector, "href")?
                    .and_then(|href| parsers::absolutize(&page_url, &href))
                else {
                    break;
                };
                navigate_with_retry(session, &next, opts.navigation_retries).await?;
                session.pause(opts.settle).await;
                page_url = next;
            }
        }
        page += 1;
    }

    log.info(format!("{} listing entries from {} ({} pages)", collected.len(), listing.url, page));
    Ok(collected)
}

/// Long-form text of a detail page, paragraphs joined by a space.
pub async fn fetch_description(
    session: &dyn PageSession,
    listing: &NewsListing,
    link: &str,
    opts: &DriverOptions,
) -> Result<String, ExtractError> {
    navigate_with_retry(session, link, opts.navigation_retries).await?;
    session.wait_for(listing.detail_ready, opts.wait).await?;
    let html = session.content().await?;
    let parts = parsers::extract_texts(&html, listing.detail_body)?;
    Ok(parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" "))
}

/// Scrape one listing in its own browser session.
pub async fn scrape_listing(
    factory: &dyn SessionFactory,
    listing: &NewsListing,
    window: NewsWindow,
    opts: &DriverOptions,
    log: &SourceLog,
) -> Result<Vec<NewsItem>, ExtractError> {
    let session = factory.open().await?;
    let cutoff = window.cutoff();
    let entries = collect_listing(session.as_ref(), listing, cutoff, opts, log).await?;

    let mut items = Vec::new();
    for entry in entries {
        let title = entry.title.as_deref().unwrap_or("<untitled>");
        let Some(date_text) = entry.date.as_deref() else {
            log.warn(format!("Skipping '{}': no date", title));
            continue;
        };
        let Some(published) = parse_fuzzy_datetime(date_text) else {
            log.warn(format!("Skipping '{}': unparseable date {:?}", title, date_text));
            continue;
        };
        if published < cutoff {
            continue;
        }
        let Some(link) = entry.link.as_deref() else { continue };

        let description = match fetch_description(session.as_ref(), listing, link, opts).await {
            Ok(text) => text,
            Err(e) => {
                log.warn(format!("Skipping '{}': detail page failed: {}", title, e));
                continue;
            }
        };

        match cleaner::news_item(
            &entry,
            &description,
            listing.sentence_delimiter,
            listing.category,
            window.now,
            window.day_start_hour,
        ) {
            Ok(item) => items.push(item),
            Err(e) => log.warn(format!("Skipping '{}': {}", title, e)),
        }
    }

    log.info(format!("News data scraped: {} items from {}", items.len(), listing.site));
    Ok(items)
}

/// Every listing in turn; a failed listing is logged and skipped.
pub async fn scrape_all(
    factory: &dyn SessionFactory,
    listings: &[NewsListing],
    window: NewsWindow,
    opts: &DriverOptions,
    log: &SourceLog,
) -> Vec<NewsItem> {
    let mut all = Vec::new();
    for listing in listings {
        match scrape_listing(factory, listing, window, opts, log).await {
            Ok(items) => all.extend(items),
            Err(e) => log.error(format!("Listing {} failed: {}", listing.url, e)),
        }
    }
    all
}
