//! Webhook fan-out notifier for promotion lifecycle events.
//!
//! Mirrors the original's `WebhookNotifier.notify_all`: per-subscriber
//! concurrent delivery, filtered by event-type subscription, where one
//! subscriber's failure never blocks another (P10). Delivery retries on
//! 5xx/transport errors with exponential backoff `base * 2^(attempt-1)`
//! (base = 1s) up to `retry_count + 1` total attempts; 4xx is never
//! retried.
//!
//! # Example
//!
//! ```no_run
//! # async fn go() -> anyhow::Result<()> {
//! use floe_webhook::WebhookNotifier;
//! use floe_types::{WebhookConfig, WebhookEventType};
//! use serde_json::json;
//!
//! let config = WebhookConfig {
//!     url: "https://hooks.example.com/floe".into(),
//!     events: vec![WebhookEventType::Promote],
//!     headers: Default::default(),
//!     secret: None,
//!     timeout_secs: 10,
//!     retry_count: 3,
//! };
//! let notifier = WebhookNotifier::new(vec![config]);
//! let results = notifier.notify_all(WebhookEventType::Promote, json!({"artifact_tag": "v1.0.0"})).await;
//! # Ok(())
//! # }
//! ```

use std::time::{Duration, Instant};

use floe_retry::{calculate_delay, RetryPolicy};
use floe_types::{WebhookConfig, WebhookEventType};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Result of one subscriber's delivery attempt sequence.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookDeliveryResult {
    pub url: String,
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub attempts: u32,
}

/// Fan-out notifier over a list of configured subscribers.
pub struct WebhookNotifier {
    configs: Vec<WebhookConfig>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(configs: Vec<WebhookConfig>) -> Self {
        Self { configs, client: reqwest::Client::new() }
    }

    /// Deliver `event` to every subscriber subscribed to it, concurrently.
    /// Never fails as a whole; per-subscriber outcomes are all returned.
    /// Each subscriber's retry/backoff sequence runs on its own task, so a
    /// slow or failing subscriber never delays another (P10).
    pub async fn notify_all(
        &self,
        event: WebhookEventType,
        payload: serde_json::Value,
    ) -> Vec<WebhookDeliveryResult> {
        let handles: Vec<_> = self
            .configs
            .iter()
            .filter(|c| c.subscribes_to(event))
            .map(|config| {
                let client = self.client.clone();
                let config = config.clone();
                let payload = payload.clone();
                tokio::spawn(async move { Self::deliver(&client, &config, event, payload).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.expect("webhook delivery task panicked"));
        }
        results
    }

    async fn deliver(
        client: &reqwest::Client,
        config: &WebhookConfig,
        event: WebhookEventType,
        payload: serde_json::Value,
    ) -> WebhookDeliveryResult {
        let span = tracing::info_span!(
            "floe.webhook.notify",
            url = %config.url,
            event_type = %event,
            timeout_seconds = config.timeout_secs,
            max_retries = config.retry_count,
        );
        let _enter = span.enter();

        let body = serde_json::json!({
            "event_type": event,
        });
        let body = merge_json(body, payload);
        let body_bytes = serde_json::to_vec(&body).unwrap_or_default();

        let retry_config = RetryPolicy::Webhook.to_config();
        let max_attempts = config.retry_count + 1;
        let started = Instant::now();

        let mut last_status: Option<u16> = None;
        let mut last_error: Option<String> = None;

        for attempt in 1..=max_attempts {
            let mut request = client
                .post(&config.url)
                .timeout(Duration::from_secs(config.timeout_secs))
                .header("Content-Type", "application/json")
                .body(body_bytes.clone());

            for (k, v) in &config.headers {
                request = request.header(k, v);
            }
            if let Some(secret) = &config.secret {
                request = request.header("X-Floe-Signature", sign(secret, &body_bytes));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    last_status = Some(status.as_u16());

                    if status.as_u16() < 400 {
                        let duration_ms = started.elapsed().as_millis() as u64;
                        tracing::info!(
                            url = %config.url,
                            event_type = %event,
                            status_code = status.as_u16(),
                            attempts = attempt,
                            duration_ms,
                            "webhook_notification_sent"
                        );
                        return WebhookDeliveryResult {
                            url: config.url.clone(),
                            success: true,
                            status_code: Some(status.as_u16()),
                            error: None,
                            attempts: attempt,
                        };
                    }

                    if status.as_u16() < 500 {
                        last_error = Some(format!("client error: {}", status.as_u16()));
                        break;
                    }

                    last_error = Some(format!("server error: {}", status.as_u16()));
                }
                Err(err) => {
                    last_error = Some(err.to_string());
                }
            }

            if attempt < max_attempts {
                let delay = calculate_delay(&retry_config, attempt);
                tracing::warn!(
                    url = %config.url,
                    event_type = %event,
                    attempt,
                    max_attempts,
                    backoff_seconds = delay.as_secs_f64(),
                    error = last_error.as_deref(),
                    "webhook_notification_retry"
                );
                tokio::time::sleep(delay).await;
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::error!(
            url = %config.url,
            event_type = %event,
            status_code = last_status,
            error = last_error.as_deref(),
            attempts = max_attempts,
            duration_ms,
            "webhook_notification_failed"
        );
        WebhookDeliveryResult {
            url: config.url.clone(),
            success: false,
            status_code: last_status,
            error: last_error,
            attempts: max_attempts,
        }
    }
}

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn merge_json(mut base: serde_json::Value, extra: serde_json::Value) -> serde_json::Value {
    if let (Some(base_map), serde_json::Value::Object(extra_map)) = (base.as_object_mut(), extra) {
        for (k, v) in extra_map {
            base_map.insert(k, v);
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic() {
        let a = sign("secret", b"payload");
        let b = sign("secret", b"payload");
        assert_eq!(a, b);
        assert!(a.starts_with("sha256="));
    }

    #[test]
    fn signature_changes_with_body() {
        let a = sign("secret", b"payload-a");
        let b = sign("secret", b"payload-b");
        assert_ne!(a, b);
    }

    #[test]
    fn merge_json_combines_fields() {
        let base = serde_json::json!({"event_type": "promote"});
        let extra = serde_json::json!({"artifact_tag": "v1.0.0"});
        let merged = merge_json(base, extra);
        assert_eq!(merged["event_type"], "promote");
        assert_eq!(merged["artifact_tag"], "v1.0.0");
    }

    #[tokio::test]
    async fn notify_all_skips_unsubscribed_event() {
        let config = WebhookConfig {
            url: "http://127.0.0.1:1/unreachable".into(),
            events: vec![WebhookEventType::Rollback],
            headers: Default::default(),
            secret: None,
            timeout_secs: 1,
            retry_count: 0,
        };
        let notifier = WebhookNotifier::new(vec![config]);
        let results = notifier
            .notify_all(WebhookEventType::Promote, serde_json::json!({}))
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn notify_all_attempts_subscribed_event_and_reports_failure() {
        let config = WebhookConfig {
            url: "http://127.0.0.1:1/unreachable".into(),
            events: vec![WebhookEventType::Promote],
            headers: Default::default(),
            secret: None,
            timeout_secs: 1,
            retry_count: 0,
        };
        let notifier = WebhookNotifier::new(vec![config]);
        let results = notifier
            .notify_all(WebhookEventType::Promote, serde_json::json!({}))
            .await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].attempts, 1);
    }
}
