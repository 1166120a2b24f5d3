//! Gate token issue and validation.
//!
//! A gate token is a short-lived, single-use credential binding a rider to a
//! station gate in one direction. The token string is a truncated SHA-256
//! digest over station, rider, issue time and a random nonce — it carries no
//! recoverable identity; validity is attested solely by presence in the
//! live registry.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::registry::TokenRegistry;
use super::scanner::ScannerDirectory;
use crate::errors::AppError;

/// Length of the truncated hex digest used as the token string.
const TOKEN_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateDirection {
    Entry,
    Exit,
}

impl GateDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            GateDirection::Entry => "entry",
            GateDirection::Exit => "exit",
        }
    }
}

/// Registry-side record of an issued token.
#[derive(Debug, Clone)]
pub struct GateTokenRecord {
    pub token: String,
    pub station_id: String,
    pub station_code: String,
    pub rider_id: String,
    pub direction: GateDirection,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub journey_id: Option<Uuid>,
}

/// Wire payload handed to the rider's device and presented at the gate.
/// Field names are part of the scanner contract — scanners read `type` for
/// UX only; all validation is server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatePass {
    pub station_id: String,
    pub station_code: String,
    /// Issue time, epoch millis.
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub direction: GateDirection,
    pub token: String,
    pub user_id: String,
    /// Expiry, epoch millis.
    pub valid_until: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journey_id: Option<Uuid>,
}

impl GatePass {
    fn from_record(record: &GateTokenRecord) -> Self {
        Self {
            station_id: record.station_id.clone(),
            station_code: record.station_code.clone(),
            timestamp: record.issued_at.timestamp_millis(),
            direction: record.direction,
            token: record.token.clone(),
            user_id: record.rider_id.clone(),
            valid_until: record.expires_at.timestamp_millis(),
            journey_id: record.journey_id,
        }
    }
}

#[derive(Clone)]
pub struct GateTokenService {
    registry: TokenRegistry,
    scanners: Arc<dyn ScannerDirectory>,
    validity: Duration,
}

impl GateTokenService {
    pub fn new(
        registry: TokenRegistry,
        scanners: Arc<dyn ScannerDirectory>,
        validity: Duration,
    ) -> Self {
        Self {
            registry,
            scanners,
            validity,
        }
    }

    pub fn registry(&self) -> &TokenRegistry {
        &self.registry
    }

    /// Issue a token for `rider_id` at `station_id`.
    ///
    /// Exit tokens must reference the journey being closed; issuing one
    /// without a journey fails with `MissingJourneyReference`.
    pub fn issue(
        &self,
        station_id: &str,
        station_code: &str,
        rider_id: &str,
        direction: GateDirection,
        journey_id: Option<Uuid>,
    ) -> Result<GatePass, AppError> {
        if direction == GateDirection::Exit && journey_id.is_none() {
            return Err(AppError::MissingJourneyReference);
        }

        self.registry.evict_expired();

        let issued_at = Utc::now();
        let token = secure_token(station_id, rider_id, issued_at.timestamp_millis());

        let record = GateTokenRecord {
            token,
            station_id: station_id.to_string(),
            station_code: station_code.to_string(),
            rider_id: rider_id.to_string(),
            direction,
            issued_at,
            expires_at: issued_at + self.validity,
            journey_id,
        };

        let pass = GatePass::from_record(&record);
        self.registry.insert(record);

        tracing::debug!(
            station = station_id,
            direction = direction.as_str(),
            live_tokens = self.registry.len(),
            "gate token issued"
        );

        Ok(pass)
    }

    /// Validate a scanned payload against the registry and the scanner's
    /// station binding. On success the token is consumed — exactly one
    /// concurrent caller can win; the rest observe
    /// `TokenAlreadyUsedOrUnknown`.
    pub async fn validate(
        &self,
        payload: &str,
        scanner_id: &str,
    ) -> Result<GateTokenRecord, AppError> {
        self.registry.evict_expired();

        let pass: GatePass =
            serde_json::from_str(payload).map_err(|_| AppError::MalformedToken)?;

        let expires_at = Utc
            .timestamp_millis_opt(pass.valid_until)
            .single()
            .ok_or(AppError::MalformedToken)?;
        if Utc::now() > expires_at {
            return Err(AppError::TokenExpired);
        }

        // Consume first: the removal is the atomic single-use gate. A scan at
        // the wrong gate must not burn the token, so the record is put back
        // on a station mismatch.
        let record = self
            .registry
            .consume(&pass.token)
            .ok_or(AppError::TokenAlreadyUsedOrUnknown)?;

        let authorized = self
            .scanners
            .is_authorized(scanner_id, &record.station_id, record.direction)
            .await
            .unwrap_or(false);
        if !authorized {
            self.registry.insert(record);
            return Err(AppError::StationMismatch);
        }

        Ok(record)
    }
}

/// One-way token digest: SHA-256 over station ‖ rider ‖ issue-millis ‖ a
/// random nonce (the nonce keeps rapid re-issues from colliding), truncated
/// to a fixed length.
fn secure_token(station_id: &str, rider_id: &str, issued_millis: i64) -> String {
    let nonce: u128 = rand::random();
    let mut hasher = Sha256::new();
    hasher.update(station_id.as_bytes());
    hasher.update(b":");
    hasher.update(rider_id.as_bytes());
    hasher.update(b":");
    hasher.update(issued_millis.to_be_bytes());
    hasher.update(b":");
    hasher.update(nonce.to_be_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..TOKEN_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct AllowAll;

    #[async_trait]
    impl ScannerDirectory for AllowAll {
        async fn is_authorized(
            &self,
            _scanner_id: &str,
            _station_id: &str,
            _direction: GateDirection,
        ) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    fn service(validity: Duration) -> GateTokenService {
        GateTokenService::new(TokenRegistry::new(), Arc::new(AllowAll), validity)
    }

    #[test]
    fn test_token_is_truncated_hex() {
        let token = secure_token("miyapur", "rider-1", 1_700_000_000_000);
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_rapid_reissue_does_not_collide() {
        let svc = service(Duration::minutes(5));
        let a = svc
            .issue("miyapur", "MYP", "rider-1", GateDirection::Entry, None)
            .unwrap();
        let b = svc
            .issue("miyapur", "MYP", "rider-1", GateDirection::Entry, None)
            .unwrap();
        assert_ne!(a.token, b.token);
        assert_eq!(svc.registry().len(), 2);
    }

    #[test]
    fn test_exit_requires_journey_reference() {
        let svc = service(Duration::minutes(5));
        let err = svc
            .issue("ameerpet", "AMP", "rider-1", GateDirection::Exit, None)
            .unwrap_err();
        assert_eq!(err.code(), "missing_journey_reference");
    }

    #[test]
    fn test_pass_wire_format() {
        let svc = service(Duration::minutes(5));
        let pass = svc
            .issue(
                "ameerpet",
                "AMP",
                "rider-1",
                GateDirection::Exit,
                Some(Uuid::nil()),
            )
            .unwrap();
        let json = serde_json::to_value(&pass).unwrap();
        assert_eq!(json["stationId"], "ameerpet");
        assert_eq!(json["stationCode"], "AMP");
        assert_eq!(json["type"], "exit");
        assert_eq!(json["userId"], "rider-1");
        assert!(json["timestamp"].is_i64());
        assert!(json["validUntil"].is_i64());
        assert!(json["journeyId"].is_string());
    }

    #[test]
    fn test_entry_pass_omits_journey_id() {
        let svc = service(Duration::minutes(5));
        let pass = svc
            .issue("miyapur", "MYP", "rider-1", GateDirection::Entry, None)
            .unwrap();
        let json = serde_json::to_value(&pass).unwrap();
        assert!(json.get("journeyId").is_none());
    }

    #[tokio::test]
    async fn test_validate_consumes_token() {
        let svc = service(Duration::minutes(5));
        let pass = svc
            .issue("miyapur", "MYP", "rider-1", GateDirection::Entry, None)
            .unwrap();
        let payload = serde_json::to_string(&pass).unwrap();

        let record = svc.validate(&payload, "scanner-1").await.unwrap();
        assert_eq!(record.station_id, "miyapur");
        assert_eq!(record.rider_id, "rider-1");

        let err = svc.validate(&payload, "scanner-1").await.unwrap_err();
        assert_eq!(err.code(), "token_already_used_or_unknown");
    }

    #[tokio::test]
    async fn test_validate_rejects_malformed_payload() {
        let svc = service(Duration::minutes(5));
        for payload in ["not json", "{}", r#"{"stationId":"x"}"#] {
            let err = svc.validate(payload, "scanner-1").await.unwrap_err();
            assert_eq!(err.code(), "malformed_token");
        }
    }

    #[tokio::test]
    async fn test_validate_rejects_expired_token() {
        let svc = service(Duration::milliseconds(5));
        let pass = svc
            .issue("miyapur", "MYP", "rider-1", GateDirection::Entry, None)
            .unwrap();
        let payload = serde_json::to_string(&pass).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(25)).await;

        let err = svc.validate(&payload, "scanner-1").await.unwrap_err();
        assert_eq!(err.code(), "token_expired");
    }

    #[tokio::test]
    async fn test_station_mismatch_does_not_burn_token() {
        struct DenyAll;

        #[async_trait]
        impl ScannerDirectory for DenyAll {
            async fn is_authorized(
                &self,
                _scanner_id: &str,
                _station_id: &str,
                _direction: GateDirection,
            ) -> anyhow::Result<bool> {
                Ok(false)
            }
        }

        let registry = TokenRegistry::new();
        let deny = GateTokenService::new(registry.clone(), Arc::new(DenyAll), Duration::minutes(5));
        let pass = deny
            .issue("miyapur", "MYP", "rider-1", GateDirection::Entry, None)
            .unwrap();
        let payload = serde_json::to_string(&pass).unwrap();

        let err = deny.validate(&payload, "wrong-scanner").await.unwrap_err();
        assert_eq!(err.code(), "station_mismatch");

        // The same token still validates at an authorized gate.
        let allow = GateTokenService::new(registry, Arc::new(AllowAll), Duration::minutes(5));
        assert!(allow.validate(&payload, "scanner-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_validation_single_winner() {
        let svc = service(Duration::minutes(5));
        let pass = svc
            .issue("miyapur", "MYP", "rider-1", GateDirection::Entry, None)
            .unwrap();
        let payload = serde_json::to_string(&pass).unwrap();

        let mut tasks = Vec::new();
        for _ in 0..12 {
            let svc = svc.clone();
            let payload = payload.clone();
            tasks.push(tokio::spawn(async move {
                svc.validate(&payload, "scanner-1").await
            }));
        }

        let mut ok = 0;
        let mut replayed = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => {
                    assert_eq!(e.code(), "token_already_used_or_unknown");
                    replayed += 1;
                }
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(replayed, 11);
    }
}
