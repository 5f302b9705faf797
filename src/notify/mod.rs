//! Best-effort fanout of alert transitions to external channels.
//!
//! Only channels with complete configuration are constructed, so a missing
//! channel is simply absent rather than an error. [`NotificationDispatcher`]
//! detaches delivery from the caller: the alert engine hands an alert over
//! and returns immediately, and every channel failure is logged inside the
//! detached task.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;

use crate::error::NotifyError;
use crate::models::ActiveAlert;

mod email;
mod sms;

pub use email::{EmailConfig, EmailNotifier};
pub use sms::{SmsConfig, SmsNotifier};

// ---

/// Outcome of one successful channel call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The channel had nobody to deliver this alert to.
    Skipped,
}

/// One external delivery channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, alert: &ActiveAlert) -> Result<Delivery, NotifyError>;
}

/// Receiver of alert transitions from the alert engine.
///
/// Implementations must return promptly and never fail; whatever delivery
/// work they do happens out of band.
pub trait AlertSink: Send + Sync {
    fn send(&self, alert: ActiveAlert);
}

/// Fans each alert out to all configured channels concurrently.
#[derive(Clone, Default)]
pub struct NotificationDispatcher {
    channels: Arc<Vec<Arc<dyn Notifier>>>,
}

impl NotificationDispatcher {
    // ---
    pub fn new(channels: Vec<Arc<dyn Notifier>>) -> Self {
        Self {
            channels: Arc::new(channels),
        }
    }

    /// Build the channels whose configuration is present.
    pub fn from_config(email: Option<EmailConfig>, sms: Option<SmsConfig>) -> Self {
        // ---
        let client = reqwest::Client::new();
        let mut channels: Vec<Arc<dyn Notifier>> = Vec::new();
        if let Some(cfg) = email {
            channels.push(Arc::new(EmailNotifier::new(client.clone(), cfg)));
        }
        if let Some(cfg) = sms {
            channels.push(Arc::new(SmsNotifier::new(client, cfg)));
        }
        Self::new(channels)
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Deliver `alert` on every channel and wait for all of them.
    ///
    /// Returns how many channels reported [`Delivery::Sent`]. Failures are
    /// logged per channel and never returned.
    pub async fn deliver(&self, alert: &ActiveAlert) -> usize {
        // ---
        let mut tasks = JoinSet::new();
        for channel in self.channels.iter() {
            let channel = Arc::clone(channel);
            let alert = alert.clone();
            tasks.spawn(async move {
                let name = channel.name();
                (name, channel.send(&alert).await)
            });
        }

        let mut sent = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(Delivery::Sent))) => {
                    sent += 1;
                    tracing::info!(channel = name, device_id = %alert.device_id, "Alert notification sent");
                }
                Ok((name, Ok(Delivery::Skipped))) => {
                    tracing::debug!(channel = name, device_id = %alert.device_id, "No recipient, notification skipped");
                }
                Ok((name, Err(e))) => {
                    tracing::warn!(channel = name, device_id = %alert.device_id, error = %e, "Alert notification failed");
                }
                Err(e) => {
                    tracing::error!(device_id = %alert.device_id, error = %e, "Notification task aborted");
                }
            }
        }
        sent
    }
}

impl AlertSink for NotificationDispatcher {
    fn send(&self, alert: ActiveAlert) {
        // ---
        if self.channels.is_empty() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(device_id = %alert.device_id, "No runtime available, dropping alert notification");
            return;
        };
        let dispatcher = self.clone();
        handle.spawn(async move {
            dispatcher.deliver(&alert).await;
        });
    }
}
