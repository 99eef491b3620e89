//! Automation Driver Boundary
//!
//! The engine never talks to a browser directly. Step handlers drive pages
//! through [`AutomationDriver`], and the scheduler obtains isolated driver
//! contexts from a [`DriverFactory`] supplied by the embedding application.
//!
//! Every driver operation reports failure as a [`DriverError`], which
//! handlers turn into an ordinary step failure.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
pub mod mock;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriverError {
    #[error("Navigation to '{url}' failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Timed out after {} ms waiting for '{selector}'", .after.as_millis())]
    Timeout { selector: String, after: Duration },

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[error("No page available for context '{0}'")]
    NoContext(String),

    #[error("Driver context is closed")]
    Closed,

    #[error("Failed to open driver context: {0}")]
    Launch(String),
}

/// Element state awaited by [`AutomationDriver::wait_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "visible" => Ok(Visibility::Visible),
            "hidden" => Ok(Visibility::Hidden),
            other => Err(format!(
                "Invalid visibility '{}': expected 'visible' or 'hidden'",
                other
            )),
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Visible => write!(f, "visible"),
            Visibility::Hidden => write!(f, "hidden"),
        }
    }
}

/// One isolated page context of a headless browser (or anything that
/// behaves like one).
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), DriverError>;

    async fn current_content(&self) -> Result<String, DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    /// Returns the text of the first element matching `selector`, or `None`
    /// when nothing matches.
    async fn query(&self, selector: &str) -> Result<Option<String>, DriverError>;

    async fn type_text(&self, selector: &str, value: &str) -> Result<(), DriverError>;

    async fn click(&self, selector: &str) -> Result<(), DriverError>;

    async fn wait_for(
        &self,
        selector: &str,
        visibility: Visibility,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    async fn scroll_to(&self, selector: &str) -> Result<(), DriverError>;

    async fn close(&self) -> Result<(), DriverError>;
}

/// Opens isolated driver contexts, one per context key.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn open(&self, context_key: &str) -> Result<Arc<dyn AutomationDriver>, DriverError>;
}
