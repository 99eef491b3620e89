//! Driver Context Pool
//!
//! Each run owns a pool of isolated driver contexts keyed by context key.
//! Steps on the same linear branch share one context; a step branching off
//! a shared parent forks its own context at the parent's current URL so
//! parallel branches never fight over one page.
//!
//! Pools outlive a pause so a resume in the same process continues on the
//! same page. After a restart the scheduler registers the URL each paused
//! step recorded, and the context is reopened there on first use.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::driver::{AutomationDriver, DriverError, DriverFactory};

/// Which context a step runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBinding {
    pub key: String,
    /// Context to fork from when `key` has no page yet
    pub fork_from: Option<String>,
    /// Parent URL pinned before the batch started
    pub fork_at: Option<String>,
}

impl ContextBinding {
    pub fn own(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fork_from: None,
            fork_at: None,
        }
    }

    pub fn fork(key: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fork_from: Some(parent.into()),
            fork_at: None,
        }
    }

    pub fn at(mut self, url: impl Into<String>) -> Self {
        self.fork_at = Some(url.into());
        self
    }
}

pub struct DriverPool {
    factory: Option<Arc<dyn DriverFactory>>,
    contexts: Mutex<HashMap<String, Arc<dyn AutomationDriver>>>,
    recovery: Mutex<HashMap<String, String>>,
}

impl DriverPool {
    pub fn new(factory: Option<Arc<dyn DriverFactory>>) -> Self {
        Self {
            factory,
            contexts: Mutex::new(HashMap::new()),
            recovery: Mutex::new(HashMap::new()),
        }
    }

    fn factory(&self) -> Result<&Arc<dyn DriverFactory>, DriverError> {
        self.factory
            .as_ref()
            .ok_or_else(|| DriverError::Launch("no automation driver configured".to_string()))
    }

    /// Opens a fresh context for `key`, closing whatever was there.
    pub async fn launch(&self, key: &str) -> Result<Arc<dyn AutomationDriver>, DriverError> {
        let driver = self.factory()?.open(key).await?;
        let previous = self
            .contexts
            .lock()
            .await
            .insert(key.to_string(), Arc::clone(&driver));

        if let Some(previous) = previous {
            if let Err(e) = previous.close().await {
                warn!("Failed to close replaced context '{}': {}", key, e);
            }
        }

        info!("Opened driver context '{}'", key);
        Ok(driver)
    }

    /// Returns the context a step should drive, opening it when needed.
    pub async fn acquire(
        &self,
        binding: &ContextBinding,
        navigation_timeout: Duration,
    ) -> Result<Arc<dyn AutomationDriver>, DriverError> {
        if let Some(driver) = self.contexts.lock().await.get(&binding.key) {
            return Ok(Arc::clone(driver));
        }

        let recovery_url = self.recovery.lock().await.remove(&binding.key);
        if let Some(url) = recovery_url {
            debug!("Restoring context '{}' at {}", binding.key, url);
            return self.open_at(&binding.key, &url, navigation_timeout).await;
        }

        if let (Some(parent_key), Some(url)) = (&binding.fork_from, &binding.fork_at) {
            debug!(
                "Forking context '{}' from '{}' at pinned {}",
                binding.key, parent_key, url
            );
            return self.open_at(&binding.key, url, navigation_timeout).await;
        }

        if let Some(parent_key) = &binding.fork_from {
            let parent = self.contexts.lock().await.get(parent_key).cloned();
            if let Some(parent) = parent {
                let url = parent.current_url().await?;
                debug!(
                    "Forking context '{}' from '{}' at {}",
                    binding.key, parent_key, url
                );
                return self.open_at(&binding.key, &url, navigation_timeout).await;
            }
        }

        Err(DriverError::NoContext(binding.key.clone()))
    }

    /// Records where a fork's parent is right now.
    ///
    /// Must run before any step of the batch, since the parent's own child
    /// shares its context and may navigate away.
    pub async fn pin_fork(&self, binding: &mut ContextBinding) {
        let Some(parent_key) = binding.fork_from.as_deref() else {
            return;
        };
        if binding.fork_at.is_some() || self.contexts.lock().await.contains_key(&binding.key) {
            return;
        }

        let Some(parent) = self.get(parent_key).await else {
            return;
        };
        match parent.current_url().await {
            Ok(url) => binding.fork_at = Some(url),
            Err(e) => warn!(
                "Could not read URL of context '{}' for fork '{}': {}",
                parent_key, binding.key, e
            ),
        }
    }

    async fn open_at(
        &self,
        key: &str,
        url: &str,
        navigation_timeout: Duration,
    ) -> Result<Arc<dyn AutomationDriver>, DriverError> {
        let driver = self.launch(key).await?;
        if !url.is_empty() {
            driver.navigate(url, navigation_timeout).await?;
        }
        Ok(driver)
    }

    /// An already-open context, if any. Never opens or forks one.
    pub async fn get(&self, key: &str) -> Option<Arc<dyn AutomationDriver>> {
        self.contexts.lock().await.get(key).cloned()
    }

    /// Remembers where a context was when its step paused.
    pub async fn register_recovery(&self, key: impl Into<String>, url: impl Into<String>) {
        self.recovery.lock().await.insert(key.into(), url.into());
    }

    pub async fn open_count(&self) -> usize {
        self.contexts.lock().await.len()
    }

    /// Closes every context. Close failures are logged, not returned.
    pub async fn close_all(&self) {
        let contexts: Vec<(String, Arc<dyn AutomationDriver>)> =
            self.contexts.lock().await.drain().collect();

        for (key, driver) in contexts {
            match driver.close().await {
                Ok(()) => debug!("Closed driver context '{}'", key),
                Err(e) => warn!("Failed to close driver context '{}': {}", key, e),
            }
        }
        self.recovery.lock().await.clear();
    }
}
