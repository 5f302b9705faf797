//! SMS channel using a form-encoded messaging API with basic auth.

use async_trait::async_trait;

use super::{Delivery, Notifier};
use crate::error::NotifyError;
use crate::models::ActiveAlert;

// ---

const CHANNEL: &str = "sms";

#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub api_url: String,
    pub account: String,
    pub token: String,
    pub from: String,
    pub to: String,
}

pub struct SmsNotifier {
    client: reqwest::Client,
    config: SmsConfig,
}

impl SmsNotifier {
    pub fn new(client: reqwest::Client, config: SmsConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Notifier for SmsNotifier {
    // ---
    fn name(&self) -> &'static str {
        CHANNEL
    }

    async fn send(&self, alert: &ActiveAlert) -> Result<Delivery, NotifyError> {
        // ---
        let text = format!("ALERT {}", alert.summary());
        let form = [
            ("From", self.config.from.as_str()),
            ("To", self.config.to.as_str()),
            ("Body", text.as_str()),
        ];

        let response = self
            .client
            .post(&self.config.api_url)
            .basic_auth(&self.config.account, Some(&self.config.token))
            .form(&form)
            .send()
            .await
            .map_err(|source| NotifyError::Transport { channel: CHANNEL, source })?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected {
                channel: CHANNEL,
                status: response.status(),
            });
        }
        Ok(Delivery::Sent)
    }
}
