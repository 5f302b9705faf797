//! Email channel backed by a transactional-mail HTTP API.

use async_trait::async_trait;
use serde::Serialize;

use super::{Delivery, Notifier};
use crate::error::NotifyError;
use crate::models::ActiveAlert;

// ---

const CHANNEL: &str = "email";

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
    /// Recipient for alerts whose viewer identity is not an address.
    pub default_to: Option<String>,
}

#[derive(Serialize)]
struct MailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: String,
    text: String,
}

pub struct EmailNotifier {
    client: reqwest::Client,
    config: EmailConfig,
}

impl EmailNotifier {
    // ---
    pub fn new(client: reqwest::Client, config: EmailConfig) -> Self {
        Self { client, config }
    }

    /// Viewer identities are email addresses; the device-level fallback key
    /// is not, so it goes to the configured default recipient.
    fn recipient<'a>(&'a self, alert: &'a ActiveAlert) -> Option<&'a str> {
        alert
            .viewer_identity
            .as_deref()
            .filter(|v| v.contains('@'))
            .or(self.config.default_to.as_deref())
    }
}

fn body(alert: &ActiveAlert) -> String {
    // ---
    format!(
        "{}\n\nDevice: {}\nReading: {:.1}°C\nThreshold: {:.1}°C ({})\nSince: {}\n",
        alert.summary(),
        alert.device_id,
        alert.temperature_c,
        alert.threshold_c,
        alert.variant,
        alert.triggered_at.to_rfc3339(),
    )
}

#[async_trait]
impl Notifier for EmailNotifier {
    // ---
    fn name(&self) -> &'static str {
        CHANNEL
    }

    async fn send(&self, alert: &ActiveAlert) -> Result<Delivery, NotifyError> {
        // ---
        let Some(to) = self.recipient(alert) else {
            return Ok(Delivery::Skipped);
        };

        let request = MailRequest {
            from: &self.config.from,
            to: [to],
            subject: format!("Temperature alert: {}", alert.summary()),
            text: body(alert),
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
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

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::AlertVariant;
    use axum::{extract::State, http::HeaderMap, http::StatusCode, routing::post, Json, Router};
    use chrono::Utc;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    type Captured = Arc<Mutex<Option<(HeaderMap, Value)>>>;

    /// Serve a fake mail API answering every request with `status`.
    async fn fake_api(status: StatusCode) -> (String, Captured) {
        // ---
        let captured = Captured::default();
        let app = Router::new()
            .route(
                "/mail",
                post(
                    move |State(seen): State<Captured>, headers: HeaderMap, Json(body): Json<Value>| async move {
                        *seen.lock().unwrap() = Some((headers, body));
                        status
                    },
                ),
            )
            .with_state(captured.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/mail", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (url, captured)
    }

    fn notifier(default_to: Option<&str>) -> EmailNotifier {
        notifier_at("http://127.0.0.1:9/mail".into(), default_to)
    }

    fn notifier_at(api_url: String, default_to: Option<&str>) -> EmailNotifier {
        EmailNotifier::new(
            reqwest::Client::new(),
            EmailConfig {
                api_url,
                api_key: "key".into(),
                from: "alerts@example.com".into(),
                default_to: default_to.map(String::from),
            },
        )
    }

    fn alert(viewer: Option<&str>) -> ActiveAlert {
        ActiveAlert {
            device_id: "Room-1".into(),
            variant: AlertVariant::Low,
            temperature_c: 2.0,
            threshold_c: 5.0,
            triggered_at: Utc::now(),
            room_label: Some("Cold store".into()),
            viewer_identity: viewer.map(String::from),
        }
    }

    #[test]
    fn test_recipient_resolution() {
        // ---
        let with_default = notifier(Some("ops@example.com"));
        assert_eq!(with_default.recipient(&alert(Some("a@x.com"))), Some("a@x.com"));
        assert_eq!(with_default.recipient(&alert(None)), Some("ops@example.com"));

        let without_default = notifier(None);
        assert_eq!(without_default.recipient(&alert(None)), None);
    }

    #[tokio::test]
    async fn test_no_recipient_is_skipped() {
        let result = notifier(None).send(&alert(None)).await;
        assert!(matches!(result, Ok(Delivery::Skipped)));
    }

    #[test]
    fn test_body_mentions_label_and_threshold() {
        // ---
        let text = body(&alert(None));
        assert!(text.starts_with("Cold store: 2.0°C is below the 5.0°C threshold"));
        assert!(text.contains("Threshold: 5.0°C (low)"));
    }

    #[tokio::test]
    async fn test_sends_json_with_bearer_auth() {
        // ---
        let (url, captured) = fake_api(StatusCode::OK).await;

        let result = notifier_at(url, None).send(&alert(Some("a@x.com"))).await;
        assert!(matches!(result, Ok(Delivery::Sent)), "got {result:?}");

        let (headers, body) = captured.lock().unwrap().take().unwrap();
        assert_eq!(headers["authorization"], "Bearer key");
        assert_eq!(body["from"], "alerts@example.com");
        assert_eq!(body["to"], serde_json::json!(["a@x.com"]));
        assert!(body["subject"].as_str().unwrap().starts_with("Temperature alert: Cold store"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_rejected() {
        // ---
        let (url, _captured) = fake_api(StatusCode::BAD_GATEWAY).await;

        let result = notifier_at(url, Some("ops@example.com")).send(&alert(None)).await;
        match result {
            Err(NotifyError::Rejected { channel, status }) => {
                assert_eq!(channel, "email");
                assert_eq!(status, reqwest::StatusCode::BAD_GATEWAY);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}
