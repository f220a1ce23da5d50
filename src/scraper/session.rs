use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::debug;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("timed out after {timeout:?} waiting for `{selector}`")]
    Timeout { selector: String, timeout: Duration },

    #[error("no element matches `{0}`")]
    MissingElement(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("browser error: {0}")]
    Browser(String),

    #[error("invalid selector `{0}`")]
    InvalidSelector(String),
}

/// One rendered page in a browser the session owns.
///
/// Locators are CSS selectors. Dropping the session closes its browser, so an
/// early return, an error, or a cancelled future all release it.
#[async_trait]
pub trait PageSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), ExtractError>;

    /// Wait until `selector` matches at least one element.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), ExtractError>;

    async fn exists(&self, selector: &str) -> Result<bool, ExtractError>;

    async fn click(&self, selector: &str) -> Result<(), ExtractError>;

    /// Click the `index`-th element matching `selector`.
    async fn click_nth(&self, selector: &str, index: usize) -> Result<(), ExtractError>;

    async fn type_into(&self, selector: &str, text: &str) -> Result<(), ExtractError>;

    /// Overwrite an input's or select's value and fire `change`.
    async fn set_value(&self, selector: &str, value: &str) -> Result<(), ExtractError>;

    /// Current rendered DOM as HTML.
    async fn content(&self) -> Result<String, ExtractError>;

    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn PageSession>, ExtractError>;
}

/// Navigate with exponential backoff; `retries` extra attempts after the first.
pub async fn navigate_with_retry(
    session: &dyn PageSession,
    url: &str,
    retries: usize,
) -> Result<(), ExtractError> {
    let strategy = ExponentialBackoff::from_millis(2)
        .factor(250)
        .max_delay(Duration::from_secs(10))
        .map(jitter)
        .take(retries);

    Retry::spawn(strategy, move || {
        debug!("GET {}", url);
        session.navigate(url)
    })
    .await
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted session used by driver tests.

    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Serves HTML keyed by the current URL; clicks on registered selectors
    /// advance to the next queued HTML for that URL.
    #[derive(Default)]
    pub struct FakeSession {
        state: Mutex<FakeState>,
        closed: Arc<AtomicBool>,
    }

    #[derive(Default)]
    struct FakeState {
        url: String,
        pages: HashMap<String, VecDeque<String>>,
        advancing: Vec<String>,
        failing_urls: Vec<String>,
        nav_failures: HashMap<String, usize>,
        actions: Vec<String>,
        stalled: bool,
    }

    impl FakeSession {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue HTML for `url`; the first entry is shown on navigation.
        pub fn page(self, url: &str, html: &str) -> Self {
            self.state
                .lock()
                .unwrap()
                .pages
                .entry(url.to_string())
                .or_default()
                .push_back(html.to_string());
            self
        }

        /// Clicking `selector` pops the current page and shows the next one.
        pub fn advances_on(self, selector: &str) -> Self {
            self.state.lock().unwrap().advancing.push(selector.to_string());
            self
        }

        pub fn fails_on(self, url: &str) -> Self {
            self.state.lock().unwrap().failing_urls.push(url.to_string());
            self
        }

        /// The next `n` navigations to `url` fail, later ones succeed.
        pub fn flaky(self, url: &str, n: usize) -> Self {
            self.state.lock().unwrap().nav_failures.insert(url.to_string(), n);
            self
        }

        /// Every `pause` hangs until the future is dropped.
        pub fn stalls(self) -> Self {
            self.state.lock().unwrap().stalled = true;
            self
        }

        pub fn closed_flag(&self) -> Arc<AtomicBool> {
            Arc::clone(&self.closed)
        }

        pub fn actions(&self) -> Vec<String> {
            self.state.lock().unwrap().actions.clone()
        }

        fn current(&self) -> Option<String> {
            let st = self.state.lock().unwrap();
            st.pages.get(&st.url).and_then(|q| q.front().cloned())
        }

        fn matches(&self, selector: &str) -> bool {
            let Some(html) = self.current() else { return false };
            let Ok(sel) = scraper::Selector::parse(selector) else { return false };
            scraper::Html::parse_document(&html).select(&sel).next().is_some()
        }
    }

    impl Drop for FakeSession {
        fn drop(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl PageSession for FakeSession {
        async fn navigate(&self, url: &str) -> Result<(), ExtractError> {
            let mut st = self.state.lock().unwrap();
            st.actions.push(format!("goto {}", url));
            if let Some(left) = st.nav_failures.get_mut(url) {
                if *left > 0 {
                    *left -= 1;
                    return Err(ExtractError::Navigation { url: url.into(), reason: "flaky".into() });
                }
            }
            if st.failing_urls.iter().any(|u| u == url) {
                return Err(ExtractError::Navigation { url: url.into(), reason: "refused".into() });
            }
            st.url = url.to_string();
            Ok(())
        }

        async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), ExtractError> {
            if self.matches(selector) {
                Ok(())
            } else {
                Err(ExtractError::Timeout { selector: selector.into(), timeout })
            }
        }

        async fn exists(&self, selector: &str) -> Result<bool, ExtractError> {
            Ok(self.matches(selector))
        }

        async fn click(&self, selector: &str) -> Result<(), ExtractError> {
            self.click_nth(selector, 0).await
        }

        async fn click_nth(&self, selector: &str, index: usize) -> Result<(), ExtractError> {
            if !self.matches(selector) {
                return Err(ExtractError::MissingElement(selector.into()));
            }
            let mut st = self.state.lock().unwrap();
            st.actions.push(format!("click {}#{}", selector, index));
            if st.advancing.iter().any(|s| s == selector) {
                let url = st.url.clone();
                if let Some(q) = st.pages.get_mut(&url) {
                    if q.len() > 1 {
                        q.pop_front();
                    }
                }
            }
            Ok(())
        }

        async fn type_into(&self, selector: &str, text: &str) -> Result<(), ExtractError> {
            self.state.lock().unwrap().actions.push(format!("type {} {}", selector, text));
            Ok(())
        }

        async fn set_value(&self, selector: &str, value: &str) -> Result<(), ExtractError> {
            self.state.lock().unwrap().actions.push(format!("set {} {}", selector, value));
            Ok(())
        }

        async fn content(&self) -> Result<String, ExtractError> {
            self.current().ok_or_else(|| ExtractError::Browser("blank page".into()))
        }

        async fn pause(&self, _duration: Duration) {
            let stalled = self.state.lock().unwrap().stalled;
            if stalled {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Hands out pre-built sessions in order.
    pub struct FakeFactory {
        sessions: Mutex<VecDeque<FakeSession>>,
    }

    impl FakeFactory {
        pub fn new(sessions: Vec<FakeSession>) -> Self {
            Self { sessions: Mutex::new(sessions.into()) }
        }
    }

    #[async_trait]
    impl SessionFactory for FakeFactory {
        async fn open(&self) -> Result<Box<dyn PageSession>, ExtractError> {
            self.sessions
                .lock()
                .unwrap()
                .pop_front()
                .map(|s| Box::new(s) as Box<dyn PageSession>)
                .ok_or_else(|| ExtractError::Browser("no browser available".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeSession;
    use super::*;

    #[tokio::test]
    async fn navigation_retries_then_succeeds() {
        let session = FakeSession::new()
            .page("https://a.b/", "<p>ok</p>")
            .flaky("https://a.b/", 2);

        tokio_test::assert_ok!(navigate_with_retry(&session, "https://a.b/", 2).await);
        let gotos = session.actions().iter().filter(|a| a.starts_with("goto")).count();
        assert_eq!(gotos, 3);
    }

    #[tokio::test]
    async fn navigation_gives_up_after_retries() {
        let session = FakeSession::new().flaky("https://a.b/", 5);
        let err = navigate_with_retry(&session, "https://a.b/", 1).await.unwrap_err();
        assert!(matches!(err, ExtractError::Navigation { .. }));
    }
}
