//! WAIT_FOR_USER_INPUT step: an explicit human gate.
//!
//! The first execution always pauses. Once the run is resumed the step runs
//! again and completes.

use async_trait::async_trait;
use chrono::Utc;

use crate::engine::contract::{StepContext, StepHandler, StepOutcome};
use crate::engine::state::{PauseKind, PauseReason};

const DEFAULT_MESSAGE: &str = "Waiting for user input";
const DEFAULT_TIMEOUT_MINUTES: u32 = 10;

pub struct WaitForUserInput;

#[async_trait]
impl StepHandler for WaitForUserInput {
    async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome {
        if ctx.resumed() {
            ctx.info(format!(
                "Resumed by user (resume #{})",
                ctx.resume_count()
            ));
            return StepOutcome::success_with([
                ("completed", "true".to_string()),
                ("resumedAt", Utc::now().to_rfc3339()),
            ]);
        }

        let message = ctx.input("Message").unwrap_or(DEFAULT_MESSAGE).to_string();
        let timeout_minutes = ctx
            .input("Timeout Minutes")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_MINUTES);
        let page_url = ctx.current_url().await;

        ctx.info(format!("Execution paused: {}", message));
        ctx.info(format!("Timeout: {} minutes", timeout_minutes));
        ctx.info(format!(
            "Current page: {}",
            page_url.as_deref().unwrap_or("No page loaded")
        ));

        let mut reason = PauseReason::new(PauseKind::ManualIntervention, message)
            .with_metadata("timeoutMinutes", timeout_minutes);
        if let Some(url) = page_url {
            reason = reason.with_metadata("pageUrl", url);
        }
        StepOutcome::Pause(reason)
    }
}
