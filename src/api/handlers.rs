use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::errors::AppError;
use crate::fare::{haversine_km, CardClass, GeoPoint};
use crate::gate::{GateAction, GateDirection, ScanOutcome};
use crate::journey::{JourneyStats, JourneyService};
use crate::ledger::RechargeConfirmation;
use crate::store::postgres::{CardRow, EntryMethod, JourneyRow, StationRow};
use crate::AppState;

/// Geofence radius for token issue proximity checks, in metres.
const GEOFENCE_RADIUS_M: f64 = 100.0;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct IssueTokenRequest {
    pub station_id: String,
    pub rider_id: String,
    #[serde(rename = "type")]
    pub direction: GateDirection,
    pub journey_id: Option<Uuid>,
    pub location: Option<GeoPoint>,
}

#[derive(Serialize)]
pub struct IssueTokenResponse {
    /// The serialized pass the rider presents at the gate.
    pub token_payload: String,
    pub station: StationSummary,
    #[serde(rename = "type")]
    pub direction: GateDirection,
    pub valid_until: i64,
    pub generated_at: i64,
}

#[derive(Serialize)]
pub struct StationSummary {
    pub id: String,
    pub name: String,
    pub code: String,
}

#[derive(Deserialize)]
pub struct ScanRequest {
    pub token_payload: String,
    pub scanner_id: String,
    pub scanner_location: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct FareQuery {
    pub from: String,
    pub to: String,
    #[serde(default = "default_card_class")]
    pub class: CardClass,
}

fn default_card_class() -> CardClass {
    CardClass::Regular
}

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum JourneyCommand {
    Start {
        rider_id: String,
        card_id: Uuid,
        origin_station_id: String,
        entry_method: EntryMethod,
        entry_location: Option<GeoPoint>,
    },
    End {
        journey_id: Uuid,
        destination_station_id: String,
        exit_method: EntryMethod,
        exit_location: Option<GeoPoint>,
    },
    Cancel {
        journey_id: Uuid,
    },
}

#[derive(Deserialize)]
pub struct RiderQuery {
    pub rider_id: String,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct CreateCardRequest {
    pub rider_id: String,
    #[serde(default = "default_card_class")]
    pub card_class: CardClass,
}

#[derive(Deserialize)]
pub struct ConfirmPaymentRequest {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
    pub rider_id: String,
    pub amount: Decimal,
}

// ── Gate handlers ─────────────────────────────────────────────

/// POST /api/v1/gate/tokens — issue an entry or exit token for a rider.
pub async fn issue_gate_token(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<IssueTokenRequest>,
) -> Result<Json<IssueTokenResponse>, AppError> {
    let station = state
        .store
        .get_station(&payload.station_id)
        .await?
        .ok_or(AppError::InvalidStation)?;
    if !station.is_active {
        return Err(AppError::InvalidStation);
    }

    // When the rider's position is supplied, require physical proximity to
    // the station before handing out a token.
    if let Some(location) = payload.location {
        let distance_m = haversine_km(location, station.location()) * 1000.0;
        if distance_m > GEOFENCE_RADIUS_M {
            return Err(AppError::OutsideGeofence);
        }
    }

    let pass = state.tokens.issue(
        &station.id,
        &station.code,
        &payload.rider_id,
        payload.direction,
        payload.journey_id,
    )?;

    let token_payload =
        serde_json::to_string(&pass).map_err(|e| AppError::Internal(e.into()))?;

    Ok(Json(IssueTokenResponse {
        token_payload,
        station: StationSummary {
            id: station.id,
            name: station.name,
            code: station.code,
        },
        direction: payload.direction,
        valid_until: pass.valid_until,
        generated_at: pass.timestamp,
    }))
}

/// POST /api/v1/gate/scan — validate a scanned token and drive the gate.
/// Denials answer 400 with the outcome body; the scanner renders the error.
pub async fn handle_gate_scan(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ScanRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let outcome: ScanOutcome = state
        .gate
        .handle_scan(
            &payload.token_payload,
            &payload.scanner_id,
            payload.scanner_location,
        )
        .await;

    let status = if outcome.action == GateAction::Deny {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    let success = outcome.action != GateAction::Deny;

    (
        status,
        Json(json!({
            "success": success,
            "action": outcome.action,
            "journey": outcome.journey,
            "error": outcome.error,
        })),
    )
}

// ── Fare handler ──────────────────────────────────────────────

/// GET /api/v1/fare?from=&to=&class= — fare quote between two stations.
pub async fn quote_fare(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FareQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let from = state
        .store
        .get_station(&params.from)
        .await?
        .ok_or(AppError::InvalidStation)?;
    let to = state
        .store
        .get_station(&params.to)
        .await?
        .ok_or(AppError::InvalidStation)?;

    let quote = state
        .fares
        .quote(from.location(), to.location(), params.class)?;

    Ok(Json(json!({
        "from": from.id,
        "to": to.id,
        "card_class": params.class,
        "fare": quote.fare,
        "distance_km": quote.distance_km,
    })))
}

// ── Journey handlers ──────────────────────────────────────────

/// POST /api/v1/journeys — manual start/end/cancel operations.
pub async fn journey_command(
    State(state): State<Arc<AppState>>,
    Json(command): Json<JourneyCommand>,
) -> Result<(StatusCode, Json<JourneyRow>), AppError> {
    let journeys: &JourneyService = &state.journeys;
    match command {
        JourneyCommand::Start {
            rider_id,
            card_id,
            origin_station_id,
            entry_method,
            entry_location,
        } => {
            let journey = journeys
                .start(
                    &rider_id,
                    card_id,
                    &origin_station_id,
                    entry_method,
                    entry_location,
                )
                .await?;
            Ok((StatusCode::CREATED, Json(journey)))
        }
        JourneyCommand::End {
            journey_id,
            destination_station_id,
            exit_method,
            exit_location,
        } => {
            let journey = journeys
                .end(journey_id, &destination_station_id, exit_method, exit_location)
                .await?;
            Ok((StatusCode::OK, Json(journey)))
        }
        JourneyCommand::Cancel { journey_id } => {
            let journey = journeys.cancel(journey_id).await?;
            Ok((StatusCode::OK, Json(journey)))
        }
    }
}

/// GET /api/v1/journeys?rider_id=&limit= — journey history, newest first.
pub async fn list_journeys(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RiderQuery>,
) -> Result<Json<Vec<JourneyRow>>, AppError> {
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let journeys = state.journeys.history(&params.rider_id, limit).await?;
    Ok(Json(journeys))
}

/// GET /api/v1/journeys/active?rider_id= — the rider's IN_PROGRESS journey.
pub async fn active_journey(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RiderQuery>,
) -> Result<Json<Option<JourneyRow>>, AppError> {
    let journey = state.journeys.active(&params.rider_id).await?;
    Ok(Json(journey))
}

/// GET /api/v1/journeys/stats?rider_id= — aggregates over completed journeys.
pub async fn journey_stats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RiderQuery>,
) -> Result<Json<JourneyStats>, AppError> {
    let stats = state.journeys.stats(&params.rider_id).await?;
    Ok(Json(stats))
}

// ── Card handlers ─────────────────────────────────────────────

/// GET /api/v1/cards?rider_id= — the rider's cards, newest first.
pub async fn list_cards(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RiderQuery>,
) -> Result<Json<Vec<CardRow>>, AppError> {
    let cards = state.ledger.list_cards(&params.rider_id).await?;
    Ok(Json(cards))
}

/// POST /api/v1/cards — issue a new stored-value card.
pub async fn create_card(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateCardRequest>,
) -> Result<(StatusCode, Json<CardRow>), AppError> {
    let card = state
        .ledger
        .issue_card(&payload.rider_id, payload.card_class)
        .await?;
    Ok((StatusCode::CREATED, Json(card)))
}

/// GET /api/v1/cards/:id
pub async fn get_card(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CardRow>, AppError> {
    let card = state
        .ledger
        .get_card(id)
        .await?
        .ok_or(AppError::InvalidCard)?;
    Ok(Json(card))
}

// ── Payment handler ───────────────────────────────────────────

/// POST /api/v1/payments/confirm — verify a gateway confirmation and credit
/// the rider's card. Idempotent per order id.
pub async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConfirmPaymentRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let outcome = state
        .ledger
        .confirm_recharge(&RechargeConfirmation {
            order_id: payload.order_id,
            payment_id: payload.payment_id,
            signature: payload.signature,
            rider_id: payload.rider_id,
            amount: payload.amount,
        })
        .await?;

    Ok(Json(json!({
        "transaction": outcome.transaction,
        "balance": outcome.balance,
        "already_processed": outcome.already_processed,
    })))
}

// ── Station handlers ──────────────────────────────────────────

/// GET /api/v1/stations — active stations, grouped by line.
pub async fn list_stations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<StationRow>>, AppError> {
    let stations = state.store.list_stations().await?;
    Ok(Json(stations))
}

/// GET /api/v1/stations/:id
pub async fn get_station(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StationRow>, AppError> {
    let station = state
        .store
        .get_station(&id)
        .await?
        .ok_or(AppError::InvalidStation)?;
    Ok(Json(station))
}
