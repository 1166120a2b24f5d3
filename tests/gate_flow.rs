//! Integration tests for the gate token lifecycle and notification dispatch.
//!
//! Token issue/validate runs entirely against the in-memory registry; the
//! scanner-station binding check is substituted per test. Journey start/end
//! and ledger settlement require PostgreSQL and are exercised by the
//! database-backed deployment suite, not here.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use faregate::gate::{GateDirection, GateTokenService, ScannerDirectory, TokenRegistry};

/// Scanner directory that authorizes a single scanner for a single station.
struct OneGate {
    scanner_id: &'static str,
    station_id: &'static str,
    direction: GateDirection,
}

#[async_trait]
impl ScannerDirectory for OneGate {
    async fn is_authorized(
        &self,
        scanner_id: &str,
        station_id: &str,
        direction: GateDirection,
    ) -> anyhow::Result<bool> {
        Ok(scanner_id == self.scanner_id
            && station_id == self.station_id
            && direction == self.direction)
    }
}

fn entry_gate_at(station: &'static str) -> GateTokenService {
    GateTokenService::new(
        TokenRegistry::new(),
        Arc::new(OneGate {
            scanner_id: "scanner-entry-1",
            station_id: station,
            direction: GateDirection::Entry,
        }),
        Duration::minutes(5),
    )
}

mod token_lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_issue_then_validate_opens_gate() {
        let svc = entry_gate_at("miyapur");
        let pass = svc
            .issue("miyapur", "MYP", "rider-1", GateDirection::Entry, None)
            .unwrap();
        let payload = serde_json::to_string(&pass).unwrap();

        let record = svc.validate(&payload, "scanner-entry-1").await.unwrap();
        assert_eq!(record.rider_id, "rider-1");
        assert_eq!(record.station_id, "miyapur");
        assert_eq!(record.direction, GateDirection::Entry);
        assert!(svc.registry().is_empty());
    }

    #[tokio::test]
    async fn test_token_is_single_use() {
        let svc = entry_gate_at("miyapur");
        let pass = svc
            .issue("miyapur", "MYP", "rider-1", GateDirection::Entry, None)
            .unwrap();
        let payload = serde_json::to_string(&pass).unwrap();

        assert!(svc.validate(&payload, "scanner-entry-1").await.is_ok());
        let replay = svc.validate(&payload, "scanner-entry-1").await.unwrap_err();
        assert_eq!(replay.code(), "token_already_used_or_unknown");
    }

    /// Two validations racing on one token: exactly one winner, every loser
    /// observes the replay error.
    #[tokio::test]
    async fn test_concurrent_validation_race() {
        let svc = entry_gate_at("miyapur");
        let pass = svc
            .issue("miyapur", "MYP", "rider-1", GateDirection::Entry, None)
            .unwrap();
        let payload = serde_json::to_string(&pass).unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let svc = svc.clone();
            let payload = payload.clone();
            tasks.push(tokio::spawn(async move {
                svc.validate(&payload, "scanner-entry-1").await
            }));
        }

        let mut winners = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => winners += 1,
                Err(e) => assert_eq!(e.code(), "token_already_used_or_unknown"),
            }
        }
        assert_eq!(winners, 1);
    }

    /// A token validated after its validity window fails with expiry, not
    /// with the replay error.
    #[tokio::test]
    async fn test_token_expires_after_validity_window() {
        let svc = GateTokenService::new(
            TokenRegistry::new(),
            Arc::new(OneGate {
                scanner_id: "scanner-entry-1",
                station_id: "miyapur",
                direction: GateDirection::Entry,
            }),
            Duration::milliseconds(10),
        );
        let pass = svc
            .issue("miyapur", "MYP", "rider-1", GateDirection::Entry, None)
            .unwrap();
        let payload = serde_json::to_string(&pass).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let err = svc.validate(&payload, "scanner-entry-1").await.unwrap_err();
        assert_eq!(err.code(), "token_expired");
    }

    #[tokio::test]
    async fn test_unknown_token_rejected_as_forged() {
        let svc = entry_gate_at("miyapur");
        // Well-formed payload whose token never came from this registry.
        let forged = serde_json::json!({
            "stationId": "miyapur",
            "stationCode": "MYP",
            "timestamp": chrono::Utc::now().timestamp_millis(),
            "type": "entry",
            "token": "deadbeefdeadbeefdeadbeefdeadbeef",
            "userId": "rider-1",
            "validUntil": chrono::Utc::now().timestamp_millis() + 300_000,
        });
        let err = svc
            .validate(&forged.to_string(), "scanner-entry-1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "token_already_used_or_unknown");
    }

    #[tokio::test]
    async fn test_malformed_payloads_rejected() {
        let svc = entry_gate_at("miyapur");
        for payload in [
            "",
            "garbage",
            "{}",
            r#"{"stationId":"miyapur","type":"entry"}"#,
        ] {
            let err = svc.validate(payload, "scanner-entry-1").await.unwrap_err();
            assert_eq!(err.code(), "malformed_token");
        }
    }

    #[tokio::test]
    async fn test_wrong_gate_denied_but_token_survives() {
        let svc = entry_gate_at("miyapur");
        let pass = svc
            .issue("ameerpet", "AMP", "rider-1", GateDirection::Entry, None)
            .unwrap();
        let payload = serde_json::to_string(&pass).unwrap();

        // The scanner is bound to miyapur; an ameerpet token mismatches.
        let err = svc.validate(&payload, "scanner-entry-1").await.unwrap_err();
        assert_eq!(err.code(), "station_mismatch");

        // Token was not burned by the wrong-gate attempt.
        assert_eq!(svc.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_exit_token_requires_journey() {
        let svc = entry_gate_at("miyapur");
        let err = svc
            .issue("miyapur", "MYP", "rider-1", GateDirection::Exit, None)
            .unwrap_err();
        assert_eq!(err.code(), "missing_journey_reference");
    }

    #[tokio::test]
    async fn test_exit_pass_carries_journey_reference() {
        let svc = entry_gate_at("miyapur");
        let journey_id = uuid::Uuid::new_v4();
        let pass = svc
            .issue(
                "miyapur",
                "MYP",
                "rider-1",
                GateDirection::Exit,
                Some(journey_id),
            )
            .unwrap();

        let json = serde_json::to_value(&pass).unwrap();
        assert_eq!(json["type"], "exit");
        assert_eq!(json["journeyId"], journey_id.to_string());
    }

    #[tokio::test]
    async fn test_sweep_drops_expired_tokens() {
        let svc = GateTokenService::new(
            TokenRegistry::new(),
            Arc::new(OneGate {
                scanner_id: "scanner-entry-1",
                station_id: "miyapur",
                direction: GateDirection::Entry,
            }),
            Duration::milliseconds(10),
        );
        svc.issue("miyapur", "MYP", "rider-1", GateDirection::Entry, None)
            .unwrap();
        svc.issue("miyapur", "MYP", "rider-2", GateDirection::Entry, None)
            .unwrap();
        assert_eq!(svc.registry().len(), 2);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let evicted = svc.registry().evict_expired();
        assert_eq!(evicted, 2);
        assert!(svc.registry().is_empty());
    }
}

mod notification_dispatch {
    use faregate::notification::{NotificationEvent, Notifier};
    use rust_decimal::Decimal;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_signed_webhook_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header_exists("x-faregate-signature"))
            .and(header_exists("x-faregate-delivery-id"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::new(
            vec![format!("{}/hook", server.uri())],
            Some("hook-secret".to_string()),
        );
        let event = NotificationEvent::journey_completed(
            "rider-1",
            "Ameerpet",
            Decimal::from(28),
            Decimal::from(122),
        );

        notifier
            .send(&format!("{}/hook", server.uri()), &event)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unsigned_webhook_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::new(vec![format!("{}/hook", server.uri())], None);
        let event = NotificationEvent::low_balance("rider-1", Decimal::from(42));

        notifier
            .send(&format!("{}/hook", server.uri()), &event)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_publish_with_no_urls_is_a_noop() {
        // Fire-and-forget with nothing configured must not panic or spawn.
        let notifier = Notifier::new(vec![], None);
        notifier.publish(NotificationEvent::journey_started("rider-1", "Miyapur"));
    }
}
