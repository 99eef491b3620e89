//! Page-driving steps.
//!
//! Every handler here works on the driver context bound to its step:
//! - LAUNCH_BROWSER opens the context and loads the start page
//! - NAVIGATE_URL and PAGE_TO_HTML classify the page afterwards and pause
//!   the run when a verification challenge shows up
//! - the element steps type, click, wait, scroll or read text; text is read
//!   from an `Html` input when one is wired, else from the live page

use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use scraper::{Html, Selector};

use crate::detection::{classify, Detection, PageKind, PageSnapshot};
use crate::driver::{AutomationDriver, DriverError, Visibility};
use crate::engine::contract::{StepContext, StepHandler, StepOutcome};
use crate::engine::state::{PauseKind, PauseReason};

fn driver_failure(e: DriverError) -> String {
    e.to_string()
}

async fn page(ctx: &StepContext<'_>) -> Result<Arc<dyn AutomationDriver>, String> {
    ctx.driver().await.map_err(driver_failure)
}

/// Classifies the current page and logs what was found.
async fn inspect(
    ctx: &mut StepContext<'_>,
    driver: &dyn AutomationDriver,
) -> Result<(Detection, PageSnapshot), String> {
    ctx.info("Running automatic page detection");
    let snapshot = PageSnapshot::capture(driver).await.map_err(driver_failure)?;
    let detection = classify(&snapshot);

    if detection.detected() && detection.confidence > ctx.config().detection_threshold {
        ctx.info(format!(
            "Detected {} page (confidence {:.0}%)",
            detection.kind,
            detection.confidence * 100.0
        ));
        match detection.kind {
            PageKind::Login => ctx.info("Login page: authenticate with FILL_INPUT and CLICK_ELEMENT"),
            PageKind::Signup => ctx.info("Signup page: complete the form with FILL_INPUT"),
            PageKind::Error => ctx.error(format!("Error page: {}", detection.message)),
            PageKind::Captcha | PageKind::None => {}
        }
    } else {
        ctx.info("No special page type detected");
    }

    Ok((detection, snapshot))
}

/// The pause returned when a challenge blocks the page.
fn challenge_pause(detection: &Detection, url: &str, message: String) -> StepOutcome {
    StepOutcome::Pause(
        PauseReason::new(PauseKind::ManualIntervention, message)
            .with_metadata("detectionType", detection.kind.as_str())
            .with_metadata("confidence", detection.confidence)
            .with_metadata("url", url)
            .with_metadata("automatic", true),
    )
}

pub struct LaunchBrowser;

#[async_trait]
impl StepHandler for LaunchBrowser {
    async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome {
        launch(ctx).await.into()
    }
}

async fn launch(ctx: &mut StepContext<'_>) -> Result<StepOutcome, String> {
    let url = ctx
        .require("Website Url")
        .map_err(|_| "Website URL input is missing".to_string())?;

    ctx.info(format!("Launching browser for {}", url));
    let driver = ctx.launch_driver().await.map_err(driver_failure)?;
    driver
        .navigate(&url, ctx.config().navigation_timeout())
        .await
        .map_err(driver_failure)?;

    ctx.info(format!("Opened page at {}", url));
    info!("Context '{}' opened at {}", ctx.context_key(), url);
    Ok(StepOutcome::success_with([
        ("Web page", "Browser instance created"),
        ("Browser Instance", "active"),
    ]))
}

pub struct NavigateUrl;

#[async_trait]
impl StepHandler for NavigateUrl {
    async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome {
        navigate(ctx).await.into()
    }
}

async fn navigate(ctx: &mut StepContext<'_>) -> Result<StepOutcome, String> {
    let url = ctx.require("Url")?;
    let driver = page(ctx).await?;

    ctx.info(format!("Navigating to {}", url));
    driver
        .navigate(&url, ctx.config().navigation_timeout())
        .await
        .map_err(driver_failure)?;
    ctx.info(format!("Loaded {}", url));

    let (detection, snapshot) = inspect(ctx, driver.as_ref()).await?;
    if detection.requires_pause(ctx.config().detection_threshold) {
        ctx.error("CAPTCHA detected after navigation, pausing for manual intervention");
        return Ok(challenge_pause(
            &detection,
            &snapshot.url,
            format!(
                "CAPTCHA detected after navigating to {}. Please solve it and resume.",
                url
            ),
        ));
    }

    Ok(StepOutcome::success_with([
        ("url", url),
        ("pageType", detection.page_type().to_string()),
        ("detectionConfidence", detection.confidence.to_string()),
    ]))
}

pub struct PageToHtml;

#[async_trait]
impl StepHandler for PageToHtml {
    async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome {
        page_to_html(ctx).await.into()
    }
}

async fn page_to_html(ctx: &mut StepContext<'_>) -> Result<StepOutcome, String> {
    let driver = page(ctx).await?;
    let (detection, snapshot) = inspect(ctx, driver.as_ref()).await?;

    if detection.requires_pause(ctx.config().detection_threshold) {
        ctx.error("CAPTCHA detected, pausing for manual intervention");
        return Ok(challenge_pause(
            &detection,
            &snapshot.url,
            format!(
                "CAPTCHA detected at {}. Please solve it and resume execution.",
                snapshot.url
            ),
        ));
    }

    let html = snapshot.content;
    ctx.info(format!("Read {} bytes of HTML from {}", html.len(), snapshot.url));
    Ok(StepOutcome::success_with([
        ("HTML", html.clone()),
        ("webPage", html),
        ("pageType", detection.page_type().to_string()),
        ("detectionConfidence", detection.confidence.to_string()),
        (
            "requiresManualIntervention",
            (detection.kind == PageKind::Captcha).to_string(),
        ),
    ]))
}

pub struct ExtractTextFromElement;

#[async_trait]
impl StepHandler for ExtractTextFromElement {
    async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome {
        extract_text(ctx).await.into()
    }
}

async fn extract_text(ctx: &mut StepContext<'_>) -> Result<StepOutcome, String> {
    let selector = ctx.require("Selector")?;
    let html = ctx
        .input("Html")
        .filter(|html| !html.trim().is_empty())
        .map(str::to_string);

    let found = match html {
        Some(html) => select_text(&html, &selector)?,
        None => page(ctx)
            .await?
            .query(&selector)
            .await
            .map_err(driver_failure)?,
    };
    let text = found.ok_or_else(|| format!("Element not found: {}", selector))?;
    let text = text.trim();
    if text.is_empty() {
        return Err("Element has no text content".to_string());
    }

    ctx.info(format!("Extracted text from {}", selector));
    Ok(StepOutcome::success_with([("Extracted Text", text)]))
}

/// Text of every element matching `selector` in `html`, concatenated.
fn select_text(html: &str, selector: &str) -> Result<Option<String>, String> {
    let parsed =
        Selector::parse(selector).map_err(|_| format!("Invalid selector: {}", selector))?;
    let document = Html::parse_document(html);

    let mut matches = document.select(&parsed).peekable();
    if matches.peek().is_none() {
        return Ok(None);
    }
    Ok(Some(matches.flat_map(|element| element.text()).collect()))
}

pub struct FillInput;

#[async_trait]
impl StepHandler for FillInput {
    async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome {
        fill_input(ctx).await.into()
    }
}

async fn fill_input(ctx: &mut StepContext<'_>) -> Result<StepOutcome, String> {
    let selector = ctx.require("Selector")?;
    let value = ctx.require("Value")?;
    let driver = page(ctx).await?;

    driver
        .type_text(&selector, &value)
        .await
        .map_err(driver_failure)?;
    ctx.info(format!("Filled input {}", selector));
    Ok(StepOutcome::success_with([("Filled", "true")]))
}

pub struct ClickElement;

#[async_trait]
impl StepHandler for ClickElement {
    async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome {
        click_element(ctx).await.into()
    }
}

async fn click_element(ctx: &mut StepContext<'_>) -> Result<StepOutcome, String> {
    let selector = ctx.require("Selector")?;
    let driver = page(ctx).await?;

    driver.click(&selector).await.map_err(driver_failure)?;
    ctx.info(format!("Clicked {}", selector));
    Ok(StepOutcome::success_with([("Clicked", "true")]))
}

pub struct WaitForElement;

#[async_trait]
impl StepHandler for WaitForElement {
    async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome {
        wait_for_element(ctx).await.into()
    }
}

async fn wait_for_element(ctx: &mut StepContext<'_>) -> Result<StepOutcome, String> {
    let selector = ctx.require("Selector")?;
    let visibility: Visibility = ctx.require("Visibility")?.parse()?;
    let driver = page(ctx).await?;

    driver
        .wait_for(&selector, visibility, ctx.config().element_timeout())
        .await
        .map_err(driver_failure)?;
    ctx.info(format!("Element {} became {}", selector, visibility));
    Ok(StepOutcome::success_with([("Element found", "true")]))
}

pub struct ScrollToElement;

#[async_trait]
impl StepHandler for ScrollToElement {
    async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome {
        scroll_to_element(ctx).await.into()
    }
}

async fn scroll_to_element(ctx: &mut StepContext<'_>) -> Result<StepOutcome, String> {
    let selector = ctx.require("Selector")?;
    let driver = page(ctx).await?;

    driver.scroll_to(&selector).await.map_err(driver_failure)?;
    ctx.info(format!("Scrolled to {}", selector));
    Ok(StepOutcome::success_with([("Scrolled", "true")]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{MockDriverFactory, MockPage, MockSite};
    use crate::driver::DriverFactory;
    use crate::engine::contract::testing::Harness;
    use serde_json::Value;

    const SHOP: &str = "https://shop.test/";
    const CHALLENGE: &str = "https://shop.test/challenge";

    fn site() -> MockSite {
        MockSite::new()
            .with_page(
                SHOP,
                MockPage::new("<h1>Shop</h1><input id=\"q\"><button id=\"go\">Go</button>")
                    .with_element("h1", "  Shop  ")
                    .with_element("#q", "")
                    .with_element("#go", "Go")
                    .with_element(".empty", "   "),
            )
            .with_page(
                CHALLENGE,
                MockPage::new("<div class=\"g-recaptcha\">Verify you are human</div>")
                    .with_element(".g-recaptcha", ""),
            )
    }

    /// Harness whose step context is already open at `url`.
    async fn opened_at(url: &str) -> (Harness, Arc<MockDriverFactory>) {
        let factory = Arc::new(MockDriverFactory::new(site()));
        let shared: Arc<dyn DriverFactory> = factory.clone();
        let harness = Harness::new().with_factory(shared);
        let driver = harness.pool.launch("node").await.unwrap();
        driver
            .navigate(url, std::time::Duration::from_secs(1))
            .await
            .unwrap();
        (harness, factory)
    }

    fn outputs(outcome: StepOutcome) -> std::collections::HashMap<String, String> {
        match outcome {
            StepOutcome::Success(outputs) => outputs,
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_launch_opens_context() {
        let factory = Arc::new(MockDriverFactory::new(site()));
        let shared: Arc<dyn DriverFactory> = factory.clone();
        let harness = Harness::new()
            .with_input("Website Url", SHOP)
            .with_factory(shared);

        let outputs = outputs(harness.run(&LaunchBrowser).await.0);
        assert_eq!(outputs["Web page"], "Browser instance created");
        assert_eq!(factory.opened_keys(), vec!["node"]);
        assert_eq!(factory.driver("node").unwrap().state().url, SHOP);
    }

    #[tokio::test]
    async fn test_launch_requires_url() {
        let (outcome, _) = Harness::new().run(&LaunchBrowser).await;
        assert_eq!(outcome, StepOutcome::failure("Website URL input is missing"));
    }

    #[tokio::test]
    async fn test_launch_without_driver_fails() {
        let harness = Harness::new().with_input("Website Url", SHOP);
        let outcome = harness.run(&LaunchBrowser).await.0;
        assert_eq!(
            outcome,
            StepOutcome::failure("Failed to open driver context: no automation driver configured")
        );
    }

    #[tokio::test]
    async fn test_navigate_reports_normal_page() {
        let (mut harness, _) = opened_at(CHALLENGE).await;
        harness.inputs.insert("Url".to_string(), SHOP.to_string());

        let outputs = outputs(harness.run(&NavigateUrl).await.0);
        assert_eq!(outputs["url"], SHOP);
        assert_eq!(outputs["pageType"], "normal");
    }

    #[tokio::test]
    async fn test_navigate_to_challenge_pauses() {
        let (mut harness, _) = opened_at(SHOP).await;
        harness.inputs.insert("Url".to_string(), CHALLENGE.to_string());

        let StepOutcome::Pause(reason) = harness.run(&NavigateUrl).await.0 else {
            panic!("expected pause");
        };
        assert_eq!(reason.kind, PauseKind::ManualIntervention);
        assert_eq!(reason.metadata["detectionType"], "captcha");
        assert_eq!(reason.metadata["automatic"], Value::Bool(true));
        assert_eq!(reason.page_url(), Some(CHALLENGE));
    }

    #[tokio::test]
    async fn test_navigate_without_context_fails() {
        let harness = Harness::new().with_input("Url", SHOP);
        assert_eq!(
            harness.run(&NavigateUrl).await.0,
            StepOutcome::failure("No page available for context 'node'")
        );
    }

    #[tokio::test]
    async fn test_page_to_html() {
        let (harness, _) = opened_at(SHOP).await;
        let outputs = outputs(harness.run(&PageToHtml).await.0);

        assert!(outputs["HTML"].contains("<h1>Shop</h1>"));
        assert_eq!(outputs["webPage"], outputs["HTML"]);
        assert_eq!(outputs["requiresManualIntervention"], "false");
    }

    #[tokio::test]
    async fn test_page_to_html_pauses_on_challenge() {
        let (harness, _) = opened_at(CHALLENGE).await;
        assert!(matches!(
            harness.run(&PageToHtml).await.0,
            StepOutcome::Pause(_)
        ));
    }

    #[tokio::test]
    async fn test_high_threshold_disables_pause() {
        let (mut harness, _) = opened_at(CHALLENGE).await;
        harness.config.detection_threshold = 1.0;

        let outputs = outputs(harness.run(&PageToHtml).await.0);
        assert_eq!(outputs["pageType"], "captcha");
        assert_eq!(outputs["requiresManualIntervention"], "true");
    }

    #[tokio::test]
    async fn test_extract_text_trims() {
        let (mut harness, _) = opened_at(SHOP).await;
        harness.inputs.insert("Selector".to_string(), "h1".to_string());
        assert_eq!(
            harness.run(&ExtractTextFromElement).await.0,
            StepOutcome::success_with([("Extracted Text", "Shop")])
        );
    }

    #[tokio::test]
    async fn test_extract_text_from_html_input_needs_no_driver() {
        let harness = Harness::new()
            .with_input("Html", "<ul><li class=\"name\"> Lamp </li><li>Chair</li></ul>")
            .with_input("Selector", "li.name");
        assert_eq!(
            harness.run(&ExtractTextFromElement).await.0,
            StepOutcome::success_with([("Extracted Text", "Lamp")])
        );
    }

    #[tokio::test]
    async fn test_html_input_wins_over_live_page() {
        let (mut harness, _) = opened_at(SHOP).await;
        harness.inputs.insert("Selector".to_string(), "h1".to_string());
        harness
            .inputs
            .insert("Html".to_string(), "<h1>Archived</h1>".to_string());
        assert_eq!(
            harness.run(&ExtractTextFromElement).await.0,
            StepOutcome::success_with([("Extracted Text", "Archived")])
        );
    }

    #[tokio::test]
    async fn test_extract_text_from_html_failures() {
        let mut harness = Harness::new().with_input("Html", "<p class=\"blank\">  </p>");

        harness.inputs.insert("Selector".to_string(), "h2".to_string());
        assert_eq!(
            harness.run(&ExtractTextFromElement).await.0,
            StepOutcome::failure("Element not found: h2")
        );

        harness.inputs.insert("Selector".to_string(), "p.blank".to_string());
        assert_eq!(
            harness.run(&ExtractTextFromElement).await.0,
            StepOutcome::failure("Element has no text content")
        );

        harness.inputs.insert("Selector".to_string(), "p[".to_string());
        assert_eq!(
            harness.run(&ExtractTextFromElement).await.0,
            StepOutcome::failure("Invalid selector: p[")
        );
    }

    #[tokio::test]
    async fn test_extract_text_missing_or_empty() {
        let (mut harness, _) = opened_at(SHOP).await;
        harness.inputs.insert("Selector".to_string(), ".price".to_string());
        assert_eq!(
            harness.run(&ExtractTextFromElement).await.0,
            StepOutcome::failure("Element not found: .price")
        );

        harness.inputs.insert("Selector".to_string(), ".empty".to_string());
        assert_eq!(
            harness.run(&ExtractTextFromElement).await.0,
            StepOutcome::failure("Element has no text content")
        );
    }

    #[tokio::test]
    async fn test_fill_and_click() {
        let (mut harness, factory) = opened_at(SHOP).await;
        harness.inputs.insert("Selector".to_string(), "#q".to_string());
        harness.inputs.insert("Value".to_string(), "lamp".to_string());
        assert!(harness.run(&FillInput).await.0.is_success());

        harness.inputs.insert("Selector".to_string(), "#go".to_string());
        assert!(harness.run(&ClickElement).await.0.is_success());

        let driver = factory.driver("node").unwrap();
        let state = driver.state();
        assert_eq!(state.typed, vec![("#q".to_string(), "lamp".to_string())]);
        assert_eq!(state.clicked, vec!["#go".to_string()]);
    }

    #[tokio::test]
    async fn test_click_missing_element_fails() {
        let (mut harness, _) = opened_at(SHOP).await;
        harness.inputs.insert("Selector".to_string(), "#nope".to_string());
        assert_eq!(
            harness.run(&ClickElement).await.0,
            StepOutcome::failure("Element not found: #nope")
        );
    }

    #[tokio::test]
    async fn test_wait_for_element() {
        let (mut harness, _) = opened_at(SHOP).await;
        harness.inputs.insert("Selector".to_string(), "h1".to_string());
        harness.inputs.insert("Visibility".to_string(), "visible".to_string());
        assert!(harness.run(&WaitForElement).await.0.is_success());

        harness.inputs.insert("Visibility".to_string(), "hidden".to_string());
        let outcome = harness.run(&WaitForElement).await.0;
        assert!(matches!(outcome, StepOutcome::Failure(m) if m.starts_with("Timed out")));
    }

    #[tokio::test]
    async fn test_wait_rejects_bad_visibility() {
        let (mut harness, _) = opened_at(SHOP).await;
        harness.inputs.insert("Selector".to_string(), "h1".to_string());
        harness.inputs.insert("Visibility".to_string(), "blurry".to_string());
        assert_eq!(
            harness.run(&WaitForElement).await.0,
            StepOutcome::failure("Invalid visibility 'blurry': expected 'visible' or 'hidden'")
        );
    }

    #[tokio::test]
    async fn test_scroll() {
        let (mut harness, factory) = opened_at(SHOP).await;
        harness.inputs.insert("Selector".to_string(), "#go".to_string());
        assert_eq!(
            harness.run(&ScrollToElement).await.0,
            StepOutcome::success_with([("Scrolled", "true")])
        );
        assert_eq!(factory.driver("node").unwrap().state().scrolled, vec!["#go"]);
    }
}
