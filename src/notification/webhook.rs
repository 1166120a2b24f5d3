use anyhow::Result;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

// ── Event Types ───────────────────────────────────────────────

/// A structured rider-facing event handed to the external messaging service
/// via webhook. Delivery is best-effort; the core never blocks on it.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent {
    /// Event type identifier, e.g. "journey_started", "low_balance".
    pub event_type: String,
    /// ISO-8601 timestamp of when the event occurred.
    pub timestamp: String,
    /// The rider the event concerns.
    pub rider_id: String,
    /// Event-specific details (station name, fare, balance, etc.).
    pub details: serde_json::Value,
}

impl NotificationEvent {
    pub fn journey_started(rider_id: &str, station_name: &str) -> Self {
        Self {
            event_type: "journey_started".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            rider_id: rider_id.to_string(),
            details: serde_json::json!({
                "station": station_name,
            }),
        }
    }

    pub fn journey_completed(
        rider_id: &str,
        station_name: &str,
        fare: Decimal,
        balance: Decimal,
    ) -> Self {
        Self {
            event_type: "journey_completed".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            rider_id: rider_id.to_string(),
            details: serde_json::json!({
                "station": station_name,
                "fare": fare,
                "balance": balance,
            }),
        }
    }

    pub fn low_balance(rider_id: &str, balance: Decimal) -> Self {
        Self {
            event_type: "low_balance".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            rider_id: rider_id.to_string(),
            details: serde_json::json!({ "balance": balance }),
        }
    }

    pub fn recharge_success(rider_id: &str, amount: Decimal, balance: Decimal) -> Self {
        Self {
            event_type: "recharge_success".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            rider_id: rider_id.to_string(),
            details: serde_json::json!({
                "amount": amount,
                "balance": balance,
            }),
        }
    }
}

// ── HMAC Signing ─────────────────────────────────────────────

/// Compute HMAC-SHA256 of `payload` using `secret`.
/// Returns "sha256=<lowercase hex digest>".
fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);
    let result = mac.finalize();
    let bytes = result.into_bytes();
    format!("sha256={}", hex::encode(bytes))
}

// ── Notifier ──────────────────────────────────────────────────

/// Dispatches rider events to the configured webhook URLs.
/// Supports:
/// - HMAC-SHA256 signing (X-Faregate-Signature header)
/// - Up to 3 retries with exponential back-off (1s → 5s → 25s)
#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    urls: Vec<String>,
    signing_secret: Option<String>,
}

impl Notifier {
    pub fn new(urls: Vec<String>, signing_secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent("Faregate-Webhook/1.0")
                .build()
                .expect("failed to build webhook HTTP client"),
            urls,
            signing_secret,
        }
    }

    /// Send a signed event to a single URL with retry.
    ///
    /// Retries up to 3 times on failure with exponential back-off.
    /// Returns `Ok(())` if delivery succeeded on any attempt.
    pub async fn send(&self, url: &str, event: &NotificationEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| anyhow::anyhow!("webhook serialize error: {}", e))?;
        let delivery_id = uuid::Uuid::new_v4().to_string();
        let signature = self
            .signing_secret
            .as_deref()
            .map(|s| hmac_sha256_hex(s, &payload));

        let backoff_secs: &[u64] = &[0, 1, 5, 25];

        for (attempt, &delay) in backoff_secs.iter().enumerate() {
            if delay > 0 {
                debug!(
                    url,
                    attempt,
                    delay_secs = delay,
                    event_type = %event.event_type,
                    "retrying webhook delivery"
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-faregate-delivery-id", &delivery_id)
                .header("x-faregate-event", &event.event_type);

            if let Some(ref sig) = signature {
                req = req.header("x-faregate-signature", sig.as_str());
            }

            let result = req.body(payload.clone()).send().await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %resp.status(),
                        "webhook delivered successfully"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    warn!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %resp.status(),
                        "webhook delivery failed (non-2xx), will retry"
                    );
                }
                Err(e) => {
                    warn!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        error = %e,
                        "webhook request error, will retry"
                    );
                }
            }
        }

        warn!(
            url,
            event_type = %event.event_type,
            delivery_id = %delivery_id,
            "webhook delivery failed after all retries"
        );
        Err(anyhow::anyhow!(
            "webhook delivery failed after 3 retries: {}",
            url
        ))
    }

    /// Publish an event to every configured URL (fire-and-forget).
    ///
    /// Each URL is attempted independently with retry; failures in one do
    /// not block others, and none of them surface to the caller.
    pub fn publish(&self, event: NotificationEvent) {
        if self.urls.is_empty() {
            return;
        }

        let notifier = self.clone();

        tokio::spawn(async move {
            for url in &notifier.urls {
                if let Err(e) = notifier.send(url, &event).await {
                    warn!(url, error = %e, "webhook dispatch ultimately failed");
                }
            }
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────
