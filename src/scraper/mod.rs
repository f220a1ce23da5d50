pub mod announcements;
pub mod chrome;
pub mod cleaner;
pub mod eps;
pub mod floorsheet;
pub mod indices;
pub mod market;
pub mod news;
pub mod parsers;
pub mod session;
pub mod sites;

use crate::config::AppConfig;
use std::time::Duration;

pub use self::chrome::ChromeSessionFactory;
pub use self::session::{ExtractError, PageSession, SessionFactory};

/// Timing and bounds shared by every driver.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Delay after an interaction so dynamic content can render.
    pub settle: Duration,
    /// Upper bound when waiting for a page element.
    pub wait: Duration,
    /// Shorter bound for listing items; a miss means "no more items".
    pub listing_wait: Duration,
    pub navigation_retries: usize,
    pub max_pages: u32,
}

impl DriverOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            settle: Duration::from_millis(cfg.browser.settle_delay_ms),
            wait: Duration::from_millis(cfg.browser.default_timeout_ms),
            listing_wait: Duration::from_secs(10),
            navigation_retries: cfg.browser.navigation_retries,
            max_pages: cfg.scrape.max_pages.max(1),
        }
    }
}

#[cfg(test)]
impl DriverOptions {
    pub(crate) fn fast() -> Self {
        Self {
            settle: Duration::ZERO,
            wait: Duration::from_millis(10),
            listing_wait: Duration::from_millis(10),
            navigation_retries: 0,
            max_pages: 10,
        }
    }
}
