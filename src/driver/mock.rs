//! Scripted in-memory driver for tests.
//!
//! A [`MockSite`] maps URLs to page content and element texts. Every
//! context opened by [`MockDriverFactory`] browses the same site but keeps
//! its own current URL and interaction history.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{AutomationDriver, DriverError, DriverFactory, Visibility};

#[derive(Debug, Clone, Default)]
pub struct MockPage {
    pub content: String,
    pub elements: HashMap<String, String>,
}

impl MockPage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            elements: HashMap::new(),
        }
    }

    pub fn with_element(mut self, selector: impl Into<String>, text: impl Into<String>) -> Self {
        self.elements.insert(selector.into(), text.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockSite {
    pages: HashMap<String, MockPage>,
}

impl MockSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, page: MockPage) -> Self {
        self.pages.insert(url.into(), page);
        self
    }
}

#[derive(Debug, Default)]
pub struct MockState {
    pub url: String,
    pub typed: Vec<(String, String)>,
    pub clicked: Vec<String>,
    pub scrolled: Vec<String>,
    pub closed: bool,
}

pub struct MockDriver {
    site: Arc<MockSite>,
    state: Mutex<MockState>,
}

impl MockDriver {
    pub fn new(site: MockSite) -> Self {
        Self::shared(Arc::new(site))
    }

    fn shared(site: Arc<MockSite>) -> Self {
        Self {
            site,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn page(&self) -> Result<MockPage, DriverError> {
        let state = self.state();
        if state.closed {
            return Err(DriverError::Closed);
        }
        Ok(self.site.pages.get(&state.url).cloned().unwrap_or_default())
    }

    fn require_element(&self, selector: &str) -> Result<(), DriverError> {
        if self.page()?.elements.contains_key(selector) {
            Ok(())
        } else {
            Err(DriverError::ElementNotFound(selector.to_string()))
        }
    }
}

#[async_trait]
impl AutomationDriver for MockDriver {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), DriverError> {
        if !self.site.pages.contains_key(url) {
            return Err(DriverError::Navigation {
                url: url.to_string(),
                message: "net::ERR_NAME_NOT_RESOLVED".to_string(),
            });
        }
        let mut state = self.state();
        if state.closed {
            return Err(DriverError::Closed);
        }
        state.url = url.to_string();
        Ok(())
    }

    async fn current_content(&self) -> Result<String, DriverError> {
        Ok(self.page()?.content)
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.state().url.clone())
    }

    async fn query(&self, selector: &str) -> Result<Option<String>, DriverError> {
        Ok(self.page()?.elements.get(selector).cloned())
    }

    async fn type_text(&self, selector: &str, value: &str) -> Result<(), DriverError> {
        self.require_element(selector)?;
        self.state()
            .typed
            .push((selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        self.require_element(selector)?;
        self.state().clicked.push(selector.to_string());
        Ok(())
    }

    async fn wait_for(
        &self,
        selector: &str,
        visibility: Visibility,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        let present = self.page()?.elements.contains_key(selector);
        let satisfied = match visibility {
            Visibility::Visible => present,
            Visibility::Hidden => !present,
        };
        if satisfied {
            Ok(())
        } else {
            Err(DriverError::Timeout {
                selector: selector.to_string(),
                after: timeout,
            })
        }
    }

    async fn scroll_to(&self, selector: &str) -> Result<(), DriverError> {
        self.require_element(selector)?;
        self.state().scrolled.push(selector.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.state().closed = true;
        Ok(())
    }
}

/// Factory recording every context it opens.
pub struct MockDriverFactory {
    site: Arc<MockSite>,
    opened: Mutex<Vec<(String, Arc<MockDriver>)>>,
}

impl MockDriverFactory {
    pub fn new(site: MockSite) -> Self {
        Self {
            site: Arc::new(site),
            opened: Mutex::new(Vec::new()),
        }
    }

    fn opened(&self) -> MutexGuard<'_, Vec<(String, Arc<MockDriver>)>> {
        self.opened.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Keys of every context opened so far, in order.
    pub fn opened_keys(&self) -> Vec<String> {
        self.opened().iter().map(|(key, _)| key.clone()).collect()
    }

    /// Most recent context opened for a key.
    pub fn driver(&self, key: &str) -> Option<Arc<MockDriver>> {
        self.opened()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, d)| Arc::clone(d))
    }
}

#[async_trait]
impl DriverFactory for MockDriverFactory {
    async fn open(&self, context_key: &str) -> Result<Arc<dyn AutomationDriver>, DriverError> {
        let driver = Arc::new(MockDriver::shared(Arc::clone(&self.site)));
        self.opened()
            .push((context_key.to_string(), Arc::clone(&driver)));
        Ok(driver)
    }
}
