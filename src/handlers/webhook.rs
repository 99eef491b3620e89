//! DELIVER_VIA_WEBHOOK step: POSTs `Body` to `Target URL`.
//!
//! Any non-2xx answer is a step failure. Bodies that parse as JSON are sent
//! as `application/json`, everything else as plain text.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use crate::engine::contract::{StepContext, StepHandler, StepOutcome};

pub struct DeliverViaWebhook {
    client: Client,
}

impl DeliverViaWebhook {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for DeliverViaWebhook {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepHandler for DeliverViaWebhook {
    async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome {
        self.deliver(ctx).await.into()
    }
}

impl DeliverViaWebhook {
    async fn deliver(&self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, String> {
        let url = ctx.require("Target URL")?;
        let body = ctx.require("Body")?;

        let content_type = if serde_json::from_str::<serde_json::Value>(&body).is_ok() {
            "application/json"
        } else {
            "text/plain; charset=utf-8"
        };

        ctx.info(format!("Delivering {} bytes to {}", body.len(), url));
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, content_type)
            .timeout(ctx.config().webhook_timeout())
            .body(body)
            .send()
            .await
            .map_err(|e| format!("Webhook request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            ctx.error(format!("Webhook answered {}", status));
            return Err(format!(
                "Webhook responded with status {}",
                status.as_u16()
            ));
        }

        ctx.info(format!("Webhook answered {}", status));
        Ok(StepOutcome::success_with([(
            "Status",
            status.as_u16().to_string(),
        )]))
    }
}
