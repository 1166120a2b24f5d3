//! Gate scan handling: token validation driving the journey state machine.
//!
//! Every scan ends in exactly one of three gate actions. Once a token has
//! been validated it is consumed; a downstream failure (card missing, rider
//! already travelling, balance too low) still denies the gate and the rider
//! must request a fresh token — an accepted trade-off of single-use tokens.

use serde::Serialize;

use super::token::{GateDirection, GateTokenRecord, GateTokenService};
use crate::errors::AppError;
use crate::fare::GeoPoint;
use crate::journey::JourneyService;
use crate::store::postgres::{EntryMethod, JourneyRow, NewScanLog, PgStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    OpenEntryGate,
    OpenExitGate,
    Deny,
}

#[derive(Debug, Serialize)]
pub struct ScanDenial {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ScanOutcome {
    pub action: GateAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journey: Option<JourneyRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ScanDenial>,
}

impl ScanOutcome {
    fn deny(err: &AppError) -> Self {
        Self {
            action: GateAction::Deny,
            journey: None,
            error: Some(ScanDenial {
                code: err.code(),
                message: err.to_string(),
            }),
        }
    }
}

#[derive(Clone)]
pub struct GateOrchestrator {
    tokens: GateTokenService,
    journeys: JourneyService,
    store: PgStore,
}

impl GateOrchestrator {
    pub fn new(tokens: GateTokenService, journeys: JourneyService, store: PgStore) -> Self {
        Self {
            tokens,
            journeys,
            store,
        }
    }

    /// Handle a scanned token payload from a gate scanner.
    pub async fn handle_scan(
        &self,
        payload: &str,
        scanner_id: &str,
        scanner_location: Option<GeoPoint>,
    ) -> ScanOutcome {
        let record = match self.tokens.validate(payload, scanner_id).await {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(scanner_id, code = err.code(), "scan denied at validation");
                self.log_scan(scanner_id, None, false, Some(err.code()))
                    .await;
                return ScanOutcome::deny(&err);
            }
        };

        let result = match record.direction {
            GateDirection::Entry => self.open_entry(&record, scanner_location).await,
            GateDirection::Exit => self.open_exit(&record, scanner_location).await,
        };

        match result {
            Ok(journey) => {
                let action = match record.direction {
                    GateDirection::Entry => GateAction::OpenEntryGate,
                    GateDirection::Exit => GateAction::OpenExitGate,
                };
                self.log_scan(scanner_id, Some((&record, Some(journey.id))), true, None)
                    .await;
                ScanOutcome {
                    action,
                    journey: Some(journey),
                    error: None,
                }
            }
            Err(err) => {
                // The token is already consumed at this point; the rider
                // needs a fresh one after resolving the denial.
                tracing::warn!(
                    scanner_id,
                    rider_id = %record.rider_id,
                    code = err.code(),
                    "scan denied after token consumption"
                );
                self.log_scan(scanner_id, Some((&record, None)), false, Some(err.code()))
                    .await;
                ScanOutcome::deny(&err)
            }
        }
    }

    async fn open_entry(
        &self,
        record: &GateTokenRecord,
        scanner_location: Option<GeoPoint>,
    ) -> Result<JourneyRow, AppError> {
        let card = self
            .store
            .find_active_card(&record.rider_id)
            .await?
            .ok_or(AppError::NoActiveCard)?;

        self.journeys
            .start(
                &record.rider_id,
                card.id,
                &record.station_id,
                EntryMethod::TokenScan,
                scanner_location,
            )
            .await
    }

    async fn open_exit(
        &self,
        record: &GateTokenRecord,
        scanner_location: Option<GeoPoint>,
    ) -> Result<JourneyRow, AppError> {
        let journey = self
            .journeys
            .active(&record.rider_id)
            .await?
            .ok_or(AppError::NoActiveJourney)?;

        self.journeys
            .end(
                journey.id,
                &record.station_id,
                EntryMethod::TokenScan,
                scanner_location,
            )
            .await
    }

    /// Best-effort audit trail. Never alters the gate decision.
    async fn log_scan(
        &self,
        scanner_id: &str,
        record: Option<(&GateTokenRecord, Option<uuid::Uuid>)>,
        success: bool,
        error: Option<&str>,
    ) {
        let log = NewScanLog {
            scanner_id: scanner_id.to_string(),
            rider_id: record.map(|(r, _)| r.rider_id.clone()),
            station_id: record.map(|(r, _)| r.station_id.clone()),
            journey_id: record.and_then(|(_, j)| j),
            direction: record.map(|(r, _)| r.direction.as_str().to_string()),
            success,
            error: error.map(String::from),
        };
        if let Err(e) = self.store.insert_scan_log(&log).await {
            tracing::warn!(scanner_id, error = %e, "scan logging failed");
        }
    }
}
