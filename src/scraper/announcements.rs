use crate::logging::SourceLog;
use crate::models::{AnnouncementItem, RawAnnouncementRow};
use chrono::NaiveDate;

use super::cleaner;
use super::parsers;
use super::session::{ExtractError, PageSession, navigate_with_retry};
use super::sites::AnnouncementPage;
use super::DriverOptions;

/// `date | text` rows of the company's announcement tab.
pub async fn read_announcements(
    session: &dyn PageSession,
    page: &AnnouncementPage,
    symbol: &str,
    opts: &DriverOptions,
) -> Result<Vec<RawAnnouncementRow>, ExtractError> {
    let url = page.url_for(symbol);
    navigate_with_retry(session, &url, opts.navigation_retries).await?;
    session.pause(opts.settle).await;

    session.wait_for(page.tab_button, opts.wait).await?;
    session.click(page.tab_button).await?;
    session.pause(opts.settle).await;
    session.wait_for(page.body, opts.wait).await?;
    session.pause(opts.settle).await;

    let html = session.content().await?;
    Ok(parsers::extract_rows(&html, page.rows, 0)?
        .into_iter()
        .map(|mut cells| {
            cells.truncate(2);
            let mut cells = cells.into_iter();
            RawAnnouncementRow { date: cells.next(), text: cells.next() }
        })
        .collect())
}

pub async fn scrape_announcements(
    session: &dyn PageSession,
    page: &AnnouncementPage,
    symbol: &str,
    today: NaiveDate,
    opts: &DriverOptions,
    log: &SourceLog,
) -> Result<Vec<AnnouncementItem>, ExtractError> {
    log.info(format!("Processing stock: {}", symbol));
    let rows = read_announcements(session, page, symbol, opts).await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        match cleaner::announcement(symbol, row, today) {
            Ok(item) => items.push(item),
            Err(e) => log.warn(format!("Skipping announcement row for {}: {}", symbol, e)),
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging;
    use crate::scraper::session::fake::FakeSession;
    use crate::scraper::sites;

    const URL: &str = "https://www.sharesansar.com/company/NABIL";

    #[tokio::test]
    async fn rows_become_items() {
        let html = r#"<button id="btn_cannouncements">Announcements</button>
            <table id="myTableCAnnouncements"><thead><tr><th>Date</th><th>Title</th></tr></thead><tbody>
              <tr><td>2026-10-18</td><td>Book closure for AGM</td></tr>
              <tr><td>2026-09-30</td><td>Q1 report published</td></tr>
              <tr><td>someday</td><td>Malformed</td></tr>
            </tbody></table>"#;
        let session = FakeSession::new().page(URL, html);
        let (log, lines) = SourceLog::memory(logging::ANNOUNCEMENTS);
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();

        let items = scrape_announcements(&session, &sites::announcements(), "NABIL", today, &DriverOptions::fast(), &log)
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        assert!(items[0].should_notify);
        assert_eq!(items[1].text, "Q1 report published");
        assert!(!items[1].should_notify);
        assert!(lines.contains("Skipping announcement row for NABIL"));
    }

    #[tokio::test]
    async fn missing_tab_is_an_extract_error() {
        let session = FakeSession::new().page(URL, "<p>Company not found</p>");
        let (log, _) = SourceLog::memory(logging::ANNOUNCEMENTS);
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let err = scrape_announcements(&session, &sites::announcements(), "NABIL", today, &DriverOptions::fast(), &log)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Timeout { .. }));
    }
}
