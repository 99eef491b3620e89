//! Page Detection
//!
//! Classifies the page a driver context is showing so page-consuming steps
//! can stop for a human when a verification challenge appears.
//!
//! Classification is split in two:
//! - [`PageSnapshot::capture`] reads content, URL and selector presence
//!   from the driver (the only side-effecting part)
//! - [`classify`] runs the classifier battery over the snapshot and is a
//!   pure function
//!
//! Confidence scores only ever grow with the number of corroborating
//! signals, so adding a matching pattern or selector never lowers a score.

use std::fmt;

use log::debug;

use crate::driver::{AutomationDriver, DriverError};

const CAPTCHA_PATTERNS: &[&str] = &[
    "g-recaptcha",
    "recaptcha",
    "grecaptcha",
    "h-captcha",
    "hcaptcha",
    "cf-challenge",
    "cloudflare",
    "captcha",
    "challenge",
    "verify you are human",
    "verify-you-are-human",
    "security check",
    "robot check",
];

const CAPTCHA_SELECTORS: &[&str] = &[
    r#"iframe[src*="recaptcha"]"#,
    r#"iframe[src*="hcaptcha"]"#,
    ".g-recaptcha",
    ".h-captcha",
    "#cf-challenge-running",
    "[data-captcha]",
];

const LOGIN_URL_PATTERNS: &[&str] = &[
    "/login",
    "/signin",
    "/sign-in",
    "/auth",
    "/account/login",
    "/user/login",
];

const LOGIN_TEXT_PATTERNS: &[&str] = &[
    "sign in",
    "log in",
    "login",
    "username",
    "password",
    "email",
    "remember me",
    "forgot password",
];

const LOGIN_SELECTORS: &[&str] = &[
    r#"input[type="password"]"#,
    r#"input[name*="password"]"#,
    r#"input[name*="email"]"#,
    r#"input[name*="username"]"#,
    r#"button[type="submit"]"#,
    r#"form[action*="login"]"#,
];

const SIGNUP_URL_PATTERNS: &[&str] = &[
    "/signup",
    "/sign-up",
    "/register",
    "/registration",
    "/create-account",
    "/join",
];

const SIGNUP_TEXT_PATTERNS: &[&str] = &[
    "sign up",
    "create account",
    "register",
    "registration",
    "join now",
    "get started",
    "confirm password",
    "terms and conditions",
    "privacy policy",
];

const SIGNUP_SELECTORS: &[&str] = &[
    r#"input[type="password"]"#,
    r#"input[name*="confirm"]"#,
    r#"input[name*="email"]"#,
    r#"input[name*="username"]"#,
    r#"input[type="checkbox"]"#,
    r#"button[type="submit"]"#,
];

const ERROR_PATTERNS: &[&str] = &[
    "404",
    "page not found",
    "500",
    "server error",
    "internal server error",
    "access denied",
    "forbidden",
    "403",
    "unauthorized",
    "401",
];

const ERROR_PAGE_CONFIDENCE: f64 = 0.8;

/// Classification of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Captcha,
    Login,
    Signup,
    Error,
    None,
}

impl PageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageKind::Captcha => "captcha",
            PageKind::Login => "login",
            PageKind::Signup => "signup",
            PageKind::Error => "error",
            PageKind::None => "none",
        }
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub kind: PageKind,
    pub message: String,
    pub selectors: Vec<String>,
    /// Score in `[0, 1]`
    pub confidence: f64,
}

impl Detection {
    fn none(message: impl Into<String>) -> Self {
        Self {
            kind: PageKind::None,
            message: message.into(),
            selectors: Vec::new(),
            confidence: 0.0,
        }
    }

    pub fn detected(&self) -> bool {
        self.kind != PageKind::None
    }

    /// Page type label used in step outputs (`normal` when nothing matched).
    pub fn page_type(&self) -> &'static str {
        if self.detected() {
            self.kind.as_str()
        } else {
            "normal"
        }
    }

    /// Returns true if this result should pause the run.
    pub fn requires_pause(&self, threshold: f64) -> bool {
        self.kind == PageKind::Captcha && self.confidence > threshold
    }
}

/// Driver state the classifiers look at.
#[derive(Debug, Clone, Default)]
pub struct PageSnapshot {
    pub url: String,
    pub content: String,
    /// Selectors from the classifier battery that matched an element
    pub present_selectors: Vec<String>,
}

impl PageSnapshot {
    pub fn new(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content: content.into(),
            present_selectors: Vec::new(),
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.present_selectors.push(selector.into());
        self
    }

    /// Reads everything the classifiers need from a live driver context.
    pub async fn capture(driver: &dyn AutomationDriver) -> Result<Self, DriverError> {
        let content = driver.current_content().await?;
        let url = driver.current_url().await?;

        let mut present_selectors: Vec<String> = Vec::new();
        for selector in CAPTCHA_SELECTORS
            .iter()
            .chain(LOGIN_SELECTORS)
            .chain(SIGNUP_SELECTORS)
        {
            if present_selectors.iter().any(|s| s == selector) {
                continue;
            }
            if driver.query(selector).await?.is_some() {
                present_selectors.push(selector.to_string());
            }
        }

        Ok(Self {
            url,
            content,
            present_selectors,
        })
    }

    fn has(&self, selector: &str) -> bool {
        self.present_selectors.iter().any(|s| s == selector)
    }

    fn matching<'a>(&self, selectors: &[&'a str]) -> Vec<&'a str> {
        selectors.iter().copied().filter(|s| self.has(s)).collect()
    }
}

fn count_matches(haystack: &str, patterns: &[&str]) -> usize {
    patterns.iter().filter(|p| haystack.contains(*p)).count()
}

pub fn detect_captcha(snapshot: &PageSnapshot) -> Detection {
    let content = snapshot.content.to_lowercase();
    let matched: Vec<&str> = CAPTCHA_PATTERNS
        .iter()
        .copied()
        .filter(|p| content.contains(p))
        .collect();
    let selectors = snapshot.matching(CAPTCHA_SELECTORS);

    if matched.is_empty() && selectors.is_empty() {
        return Detection::none("No CAPTCHA detected");
    }

    let confidence = (matched.len() as f64 * 0.3 + selectors.len() as f64 * 0.5).min(1.0);
    let evidence = match matched.last() {
        Some(pattern) => pattern.to_string(),
        None => selectors.join(", "),
    };

    Detection {
        kind: PageKind::Captcha,
        message: format!("CAPTCHA detected: {}", evidence),
        selectors: selectors.iter().map(|s| s.to_string()).collect(),
        confidence,
    }
}

pub fn detect_login_page(snapshot: &PageSnapshot) -> Detection {
    let url = snapshot.url.to_lowercase();
    let url_match = LOGIN_URL_PATTERNS.iter().any(|p| url.contains(p));
    let text_matches = count_matches(&snapshot.content.to_lowercase(), LOGIN_TEXT_PATTERNS);
    let selectors = snapshot.matching(LOGIN_SELECTORS);

    let has_password = selectors.iter().any(|s| s.contains("password"));
    let has_user = selectors
        .iter()
        .any(|s| s.contains("email") || s.contains("username"));
    let has_submit = selectors.iter().any(|s| s.contains("submit"));

    let detected = (has_password && has_user && has_submit) || (url_match && text_matches >= 3);
    if !detected {
        return Detection::none("Not a login page");
    }

    let confidence = ((if url_match { 0.4 } else { 0.0 })
        + text_matches as f64 / LOGIN_TEXT_PATTERNS.len() as f64 * 0.3
        + selectors.len() as f64 / LOGIN_SELECTORS.len() as f64 * 0.3)
        .min(1.0);

    Detection {
        kind: PageKind::Login,
        message: "Login page detected".to_string(),
        selectors: selectors.iter().map(|s| s.to_string()).collect(),
        confidence,
    }
}

pub fn detect_signup_page(snapshot: &PageSnapshot) -> Detection {
    let url = snapshot.url.to_lowercase();
    let url_match = SIGNUP_URL_PATTERNS.iter().any(|p| url.contains(p));
    let text_matches = count_matches(&snapshot.content.to_lowercase(), SIGNUP_TEXT_PATTERNS);
    let selectors = snapshot.matching(SIGNUP_SELECTORS);

    let has_confirm = selectors.iter().any(|s| s.contains("confirm"));
    let has_terms = selectors.iter().any(|s| s.contains(r#"type="checkbox""#));

    let detected = url_match || (text_matches >= 3 && (has_confirm || has_terms));
    if !detected {
        return Detection::none("Not a signup page");
    }

    let confidence = ((if url_match { 0.5 } else { 0.0 })
        + text_matches as f64 / SIGNUP_TEXT_PATTERNS.len() as f64 * 0.3
        + if has_confirm || has_terms { 0.2 } else { 0.0 })
    .min(1.0);

    Detection {
        kind: PageKind::Signup,
        message: "Signup/Registration page detected".to_string(),
        selectors: selectors.iter().map(|s| s.to_string()).collect(),
        confidence,
    }
}

pub fn detect_error_page(snapshot: &PageSnapshot) -> Detection {
    let content = snapshot.content.to_lowercase();
    match ERROR_PATTERNS.iter().find(|p| content.contains(*p)) {
        Some(pattern) => Detection {
            kind: PageKind::Error,
            message: format!("Error page detected: {}", pattern),
            selectors: Vec::new(),
            confidence: ERROR_PAGE_CONFIDENCE,
        },
        None => Detection::none("No error detected"),
    }
}

/// Runs the whole battery and returns the highest-confidence result.
///
/// Ties go to the classifier that runs first (captcha, login, signup, error).
pub fn classify(snapshot: &PageSnapshot) -> Detection {
    let battery = [
        detect_captcha(snapshot),
        detect_login_page(snapshot),
        detect_signup_page(snapshot),
        detect_error_page(snapshot),
    ];

    let mut best: Option<Detection> = None;
    for result in battery {
        let better = match &best {
            Some(current) => result.confidence > current.confidence,
            None => true,
        };
        if better {
            best = Some(result);
        }
    }

    let best = best.unwrap_or_else(|| Detection::none("No detection ran"));
    debug!(
        "Page classified as {} (confidence {:.2}) at {}",
        best.kind, best.confidence, snapshot.url
    );
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{MockDriver, MockPage, MockSite};

    #[test]
    fn test_plain_page_is_normal() {
        let snapshot = PageSnapshot::new("https://example.com/", "<h1>Hello</h1>");
        let result = classify(&snapshot);
        assert_eq!(result.kind, PageKind::None);
        assert_eq!(result.page_type(), "normal");
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_captcha_confidence_monotonic_in_patterns() {
        let one = PageSnapshot::new("https://a.test/", "please complete the security check");
        let two = PageSnapshot::new(
            "https://a.test/",
            "please complete the security check - robot check",
        );

        let c1 = detect_captcha(&one).confidence;
        let c2 = detect_captcha(&two).confidence;
        assert!(c1 > 0.0);
        assert!(c2 >= c1);
    }

    #[test]
    fn test_captcha_confidence_monotonic_in_selectors() {
        let base = PageSnapshot::new("https://a.test/", "robot check");
        let with_selector = base.clone().with_selector(".g-recaptcha");
        assert!(detect_captcha(&with_selector).confidence >= detect_captcha(&base).confidence);
    }

    #[test]
    fn test_captcha_confidence_capped() {
        let snapshot = PageSnapshot::new(
            "https://a.test/",
            "g-recaptcha hcaptcha cloudflare verify you are human",
        )
        .with_selector(".g-recaptcha")
        .with_selector(".h-captcha");
        assert_eq!(detect_captcha(&snapshot).confidence, 1.0);
    }

    #[test]
    fn test_captcha_pauses_above_threshold() {
        let snapshot = PageSnapshot::new("https://shop.test/", "<div class=\"g-recaptcha\"></div>");
        let result = classify(&snapshot);
        assert_eq!(result.kind, PageKind::Captcha);
        assert!(result.requires_pause(0.5));
    }

    #[test]
    fn test_single_weak_signal_does_not_pause() {
        let snapshot = PageSnapshot::new("https://a.test/", "a new challenge awaits");
        let result = detect_captcha(&snapshot);
        assert_eq!(result.kind, PageKind::Captcha);
        assert!(!result.requires_pause(0.5));
    }

    #[test]
    fn test_login_form_signature() {
        let snapshot = PageSnapshot::new("https://a.test/home", "")
            .with_selector(r#"input[type="password"]"#)
            .with_selector(r#"input[name*="email"]"#)
            .with_selector(r#"button[type="submit"]"#);
        let result = detect_login_page(&snapshot);
        assert_eq!(result.kind, PageKind::Login);
        assert!((result.confidence - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_login_url_and_text() {
        let snapshot = PageSnapshot::new(
            "https://a.test/login",
            "Sign in with your username and password",
        );
        let result = detect_login_page(&snapshot);
        assert_eq!(result.kind, PageKind::Login);
        assert!(result.confidence > 0.4);
    }

    #[test]
    fn test_signup_url_match() {
        let snapshot = PageSnapshot::new("https://a.test/register", "");
        let result = detect_signup_page(&snapshot);
        assert_eq!(result.kind, PageKind::Signup);
        assert!((result.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_error_page_wins_over_weaker_signals() {
        let snapshot = PageSnapshot::new("https://a.test/x", "404 page not found");
        let result = classify(&snapshot);
        assert_eq!(result.kind, PageKind::Error);
        assert_eq!(result.confidence, ERROR_PAGE_CONFIDENCE);
    }

    #[test]
    fn test_captcha_outranks_error_page() {
        // captcha: 0.3 * 2 + 0.5, capped at 1.0; error: 0.8
        let snapshot = PageSnapshot::new("https://a.test/", "403 recaptcha")
            .with_selector(".g-recaptcha");
        assert_eq!(classify(&snapshot).kind, PageKind::Captcha);
    }

    #[tokio::test]
    async fn test_capture_from_driver() {
        let site = MockSite::new().with_page(
            "https://a.test/",
            MockPage::new("<div class=\"g-recaptcha\"></div>").with_element(".g-recaptcha", ""),
        );
        let driver = MockDriver::new(site);
        driver
            .navigate("https://a.test/", std::time::Duration::from_secs(1))
            .await
            .unwrap();

        let snapshot = PageSnapshot::capture(&driver).await.unwrap();
        assert_eq!(snapshot.url, "https://a.test/");
        assert_eq!(snapshot.present_selectors, vec![".g-recaptcha".to_string()]);
    }
}
