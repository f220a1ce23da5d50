//! Headless Chromium backend for [`PageSession`].
//!
//! `headless_chrome` is a blocking client, so every call hops onto the
//! blocking pool with its own handle to the tab.

use crate::config::BrowserConfig;
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::session::{ExtractError, PageSession, SessionFactory};

pub struct ChromeSessionFactory {
    config: BrowserConfig,
}

impl ChromeSessionFactory {
    pub fn new(config: &BrowserConfig) -> Self {
        Self { config: config.clone() }
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    async fn open(&self) -> Result<Box<dyn PageSession>, ExtractError> {
        let config = self.config.clone();
        let session = tokio::task::spawn_blocking(move || ChromeSession::launch(&config))
            .await
            .map_err(|e| ExtractError::Browser(format!("launch task failed: {}", e)))??;
        Ok(Box::new(session))
    }
}

pub struct ChromeSession {
    // Field order matters: the tab goes before the browser process.
    tab: Arc<Tab>,
    _browser: Browser,
    default_timeout: Duration,
}

impl ChromeSession {
    fn launch(config: &BrowserConfig) -> Result<Self, ExtractError> {
        info!("Launching headless browser (headless={})", config.headless);

        let args: Vec<&OsStr> = config.launch_args.iter().map(OsStr::new).collect();
        let options = LaunchOptions::default_builder()
            .headless(config.headless)
            .sandbox(false)
            .path(config.executable_path.clone())
            .args(args)
            .idle_browser_timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| ExtractError::Browser(e.to_string()))?;

        let browser = Browser::new(options).map_err(browser_err)?;
        let tab = browser.new_tab().map_err(browser_err)?;
        tab.set_user_agent(&config.user_agent, None, None).map_err(browser_err)?;
        let default_timeout = Duration::from_millis(config.default_timeout_ms);
        tab.set_default_timeout(default_timeout);

        Ok(Self { tab, _browser: browser, default_timeout })
    }

    async fn with_tab<T, F>(&self, f: F) -> Result<T, ExtractError>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> Result<T, ExtractError> + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || f(&tab))
            .await
            .map_err(|e| ExtractError::Browser(format!("browser task failed: {}", e)))?
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        debug!("Closing browser session");
        let _ = self.tab.close(false);
    }
}

fn browser_err(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Browser(e.to_string())
}

#[async_trait]
impl PageSession for ChromeSession {
    async fn navigate(&self, url: &str) -> Result<(), ExtractError> {
        let target = url.to_string();
        self.with_tab(move |tab| {
            tab.navigate_to(&target)
                .and_then(|t| t.wait_until_navigated())
                .map(|_| ())
                .map_err(|e| ExtractError::Navigation { url: target.clone(), reason: e.to_string() })
        })
        .await
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), ExtractError> {
        let selector = selector.to_string();
        self.with_tab(move |tab| {
            tab.wait_for_element_with_custom_timeout(&selector, timeout)
                .map(|_| ())
                .map_err(|_| ExtractError::Timeout { selector: selector.clone(), timeout })
        })
        .await
    }

    async fn exists(&self, selector: &str) -> Result<bool, ExtractError> {
        let selector = selector.to_string();
        self.with_tab(move |tab| Ok(tab.find_element(&selector).is_ok())).await
    }

    async fn click(&self, selector: &str) -> Result<(), ExtractError> {
        self.click_nth(selector, 0).await
    }

    async fn click_nth(&self, selector: &str, index: usize) -> Result<(), ExtractError> {
        let selector = selector.to_string();
        let timeout = self.default_timeout;
        self.with_tab(move |tab| {
            tab.wait_for_element_with_custom_timeout(&selector, timeout)
                .map_err(|_| ExtractError::Timeout { selector: selector.clone(), timeout })?;
            let elements = tab.find_elements(&selector).map_err(browser_err)?;
            let element = elements
                .get(index)
                .ok_or_else(|| ExtractError::MissingElement(format!("{}[{}]", selector, index)))?;
            element.scroll_into_view().map_err(browser_err)?;
            element.click().map_err(browser_err)?;
            Ok(())
        })
        .await
    }

    async fn type_into(&self, selector: &str, text: &str) -> Result<(), ExtractError> {
        let selector = selector.to_string();
        let text = text.to_string();
        let timeout = self.default_timeout;
        self.with_tab(move |tab| {
            let element = tab
                .wait_for_element_with_custom_timeout(&selector, timeout)
                .map_err(|_| ExtractError::Timeout { selector: selector.clone(), timeout })?;
            element.click().map_err(browser_err)?;
            tab.type_str(&text).map_err(browser_err)?;
            Ok(())
        })
        .await
    }

    async fn set_value(&self, selector: &str, value: &str) -> Result<(), ExtractError> {
        let selector = selector.to_string();
        let value = value.to_string();
        let timeout = self.default_timeout;
        self.with_tab(move |tab| {
            let element = tab
                .wait_for_element_with_custom_timeout(&selector, timeout)
                .map_err(|_| ExtractError::Timeout { selector: selector.clone(), timeout })?;
            element
                .call_js_fn(
                    "function(v) { this.value = v; this.dispatchEvent(new Event('change', { bubbles: true })); }",
                    vec![serde_json::Value::String(value)],
                    false,
                )
                .map_err(browser_err)?;
            Ok(())
        })
        .await
    }

    async fn content(&self) -> Result<String, ExtractError> {
        self.with_tab(|tab| tab.get_content().map_err(browser_err)).await
    }
}
