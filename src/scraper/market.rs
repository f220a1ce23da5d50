//! Market-hours gate.

use crate::logging::SourceLog;

use super::parsers;
use super::session::{ExtractError, PageSession, SessionFactory, navigate_with_retry};
use super::sites::StatusIndicator;
use super::DriverOptions;

pub fn is_live(status_text: &str, marker: &str) -> bool {
    status_text.contains(marker)
}

async fn read_status(
    session: &dyn PageSession,
    indicator: &StatusIndicator,
    opts: &DriverOptions,
) -> Result<String, ExtractError> {
    navigate_with_retry(session, &indicator.url, opts.navigation_retries).await?;
    session.wait_for(indicator.selector, opts.wait).await?;
    let html = session.content().await?;
    parsers::extract_text(&html, indicator.selector)?
        .ok_or_else(|| ExtractError::MissingElement(indicator.selector.to_string()))
}

/// True iff the status indicator reads live. Any failure reads as closed.
pub async fn check_market(
    factory: &dyn SessionFactory,
    indicator: &StatusIndicator,
    opts: &DriverOptions,
    log: &SourceLog,
) -> bool {
    let status = match factory.open().await {
        Ok(session) => read_status(session.as_ref(), indicator, opts).await,
        Err(e) => Err(e),
    };

    match status {
        Ok(text) => {
            log.info(format!("Retrieved market status text: {}", text));
            is_live(&text, indicator.live_marker)
        }
        Err(e) => {
            log.error(format!("An error occurred during status checking: {}", e));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging;
    use crate::scraper::session::fake::{FakeFactory, FakeSession};
    use crate::scraper::sites;

    const URL: &str = "https://www.nepalstock.com.np/";

    fn dashboard(status: &str) -> String {
        format!(
            r#"<app-dashboard><div><div><div><div><div>
                 <div>Market</div>
                 <div><span>Status:</span><span> {} </span></div>
               </div></div></div></div></div></app-dashboard>"#,
            status
        )
    }

    #[tokio::test]
    async fn live_marker_means_open() {
        let factory = FakeFactory::new(vec![FakeSession::new().page(URL, &dashboard("Live Market"))]);
        let (log, lines) = SourceLog::memory(logging::MARKET_STATUS);
        assert!(check_market(&factory, &sites::market_status(), &DriverOptions::fast(), &log).await);
        assert!(lines.contains("Live Market"));
    }

    #[tokio::test]
    async fn closed_or_broken_reads_as_closed() {
        let (log, lines) = SourceLog::memory(logging::MARKET_STATUS);
        let opts = DriverOptions::fast();

        let closed = FakeFactory::new(vec![FakeSession::new().page(URL, &dashboard("Market Closed"))]);
        assert!(!check_market(&closed, &sites::market_status(), &opts, &log).await);

        let blank = FakeFactory::new(vec![FakeSession::new().page(URL, "<p>loading</p>")]);
        assert!(!check_market(&blank, &sites::market_status(), &opts, &log).await);

        let unreachable = FakeFactory::new(vec![FakeSession::new().fails_on(URL)]);
        assert!(!check_market(&unreachable, &sites::market_status(), &opts, &log).await);

        let no_browser = FakeFactory::new(vec![]);
        assert!(!check_market(&no_browser, &sites::market_status(), &opts, &log).await);

        assert_eq!(lines.lines().iter().filter(|l| l.contains("status checking")).count(), 3);
    }

    #[test]
    fn marker_is_a_substring_match() {
        assert!(is_live(" Live Market ", "Live Market"));
        assert!(!is_live("Pre Open", "Live Market"));
    }
}
