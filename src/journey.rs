//! Journey lifecycle: entry scan to exit scan.
//!
//! A journey is IN_PROGRESS from a valid entry until it is COMPLETED (exit +
//! fare settlement) or CANCELLED. A rider can hold at most one IN_PROGRESS
//! journey; the database's partial unique index is the authority under
//! concurrent entry scans.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::fare::{FareSchedule, GeoPoint};
use crate::notification::{NotificationEvent, Notifier};
use crate::store::postgres::{
    CompletionResult, EntryMethod, JourneyExit, JourneyRow, NewJourney, PgStore,
};

pub use crate::store::postgres::JourneyStatus;

#[derive(Clone)]
pub struct JourneyService {
    store: PgStore,
    fares: FareSchedule,
    notifier: Notifier,
    min_entry_balance: Decimal,
    low_balance_threshold: Decimal,
}

#[derive(Debug, Serialize)]
pub struct JourneyStats {
    pub total_journeys: usize,
    pub total_distance_km: f64,
    pub total_fare: Decimal,
    pub average_fare: Decimal,
    pub favorite_station: Option<String>,
}

impl JourneyService {
    pub fn new(
        store: PgStore,
        fares: FareSchedule,
        notifier: Notifier,
        min_entry_balance: u32,
        low_balance_threshold: u32,
    ) -> Self {
        Self {
            store,
            fares,
            notifier,
            min_entry_balance: Decimal::from(min_entry_balance),
            low_balance_threshold: Decimal::from(low_balance_threshold),
        }
    }

    /// Start a journey at the origin station.
    ///
    /// The card must exist, be active, and belong to the rider; the balance
    /// must cover the minimum-to-enter threshold; the station must be
    /// active; and the rider must not already be travelling.
    pub async fn start(
        &self,
        rider_id: &str,
        card_id: Uuid,
        origin_station_id: &str,
        entry_method: EntryMethod,
        entry_coords: Option<GeoPoint>,
    ) -> Result<JourneyRow, AppError> {
        if self.store.active_journey(rider_id).await?.is_some() {
            return Err(AppError::JourneyAlreadyActive);
        }

        let card = self
            .store
            .get_card(card_id)
            .await?
            .ok_or(AppError::InvalidCard)?;
        if !card.is_active || card.rider_id != rider_id {
            return Err(AppError::InvalidCard);
        }
        if card.balance < self.min_entry_balance {
            return Err(AppError::InsufficientBalance);
        }

        let origin = self
            .store
            .get_station(origin_station_id)
            .await?
            .ok_or(AppError::InvalidStation)?;
        if !origin.is_active {
            return Err(AppError::InvalidStation);
        }

        let journey = self
            .store
            .insert_journey(&NewJourney {
                rider_id: rider_id.to_string(),
                card_id,
                origin_station_id: origin_station_id.to_string(),
                entry_method,
                entry_latitude: entry_coords.map(|c| c.latitude),
                entry_longitude: entry_coords.map(|c| c.longitude),
            })
            .await
            .map_err(map_active_journey_conflict)?;

        tracing::info!(
            rider_id,
            journey_id = %journey.id,
            origin = origin_station_id,
            method = ?entry_method,
            "journey started"
        );

        self.notifier
            .publish(NotificationEvent::journey_started(rider_id, &origin.name));

        Ok(journey)
    }

    /// Complete a journey at the destination station and settle the fare.
    ///
    /// The fare is debited from the journey's bound card; when the balance
    /// cannot cover it the journey stays IN_PROGRESS and the caller gets
    /// `InsufficientBalance` — the rider must top up and scan again.
    pub async fn end(
        &self,
        journey_id: Uuid,
        destination_station_id: &str,
        exit_method: EntryMethod,
        exit_coords: Option<GeoPoint>,
    ) -> Result<JourneyRow, AppError> {
        let journey = self
            .store
            .get_journey(journey_id)
            .await?
            .ok_or(AppError::JourneyNotFound)?;
        if journey.status != JourneyStatus::InProgress {
            return Err(AppError::JourneyNotActive);
        }

        let destination = self
            .store
            .get_station(destination_station_id)
            .await?
            .ok_or(AppError::InvalidStation)?;
        if !destination.is_active {
            return Err(AppError::InvalidStation);
        }

        let origin = self
            .store
            .get_station(&journey.origin_station_id)
            .await?
            .ok_or(AppError::InvalidStation)?;

        // The debit is bound to the journey's card, not a fresh lookup.
        let card = self
            .store
            .get_card(journey.card_id)
            .await?
            .ok_or(AppError::InvalidCard)?;

        let quote = self
            .fares
            .quote(origin.location(), destination.location(), card.card_class)?;
        let duration_min =
            ((Utc::now() - journey.entry_time).num_seconds() as f64 / 60.0).round() as i32;

        let exit = JourneyExit {
            journey_id,
            destination_station_id: destination_station_id.to_string(),
            exit_method,
            exit_latitude: exit_coords.map(|c| c.latitude),
            exit_longitude: exit_coords.map(|c| c.longitude),
            fare: quote.fare,
            distance_km: quote.distance_km,
            duration_min,
            description: format!("Journey from {} to {}", origin.name, destination.name),
        };

        let (journey, balance) = match self
            .store
            .complete_journey(journey.card_id, &journey.rider_id, &exit)
            .await?
        {
            CompletionResult::Completed { journey, balance } => (journey, balance),
            CompletionResult::NotActive => return Err(AppError::JourneyNotActive),
            CompletionResult::InsufficientBalance => return Err(AppError::InsufficientBalance),
        };

        tracing::info!(
            rider_id = %journey.rider_id,
            journey_id = %journey.id,
            destination = destination_station_id,
            fare = %quote.fare,
            balance = %balance,
            "journey completed"
        );

        self.notifier.publish(NotificationEvent::journey_completed(
            &journey.rider_id,
            &destination.name,
            quote.fare,
            balance,
        ));
        if balance < self.low_balance_threshold {
            self.notifier
                .publish(NotificationEvent::low_balance(&journey.rider_id, balance));
        }

        Ok(journey)
    }

    /// Cancel an IN_PROGRESS journey: no fare, no destination.
    pub async fn cancel(&self, journey_id: Uuid) -> Result<JourneyRow, AppError> {
        if self.store.get_journey(journey_id).await?.is_none() {
            return Err(AppError::JourneyNotFound);
        }
        let journey = self
            .store
            .cancel_journey(journey_id)
            .await?
            .ok_or(AppError::JourneyNotActive)?;

        tracing::info!(rider_id = %journey.rider_id, journey_id = %journey.id, "journey cancelled");
        Ok(journey)
    }

    pub async fn active(&self, rider_id: &str) -> Result<Option<JourneyRow>, AppError> {
        Ok(self.store.active_journey(rider_id).await?)
    }

    pub async fn get(&self, journey_id: Uuid) -> Result<Option<JourneyRow>, AppError> {
        Ok(self.store.get_journey(journey_id).await?)
    }

    pub async fn history(&self, rider_id: &str, limit: i64) -> Result<Vec<JourneyRow>, AppError> {
        Ok(self.store.journey_history(rider_id, limit).await?)
    }

    /// Aggregate statistics over a rider's completed journeys.
    pub async fn stats(&self, rider_id: &str) -> Result<JourneyStats, AppError> {
        let journeys = self.store.completed_journeys(rider_id).await?;

        let total_journeys = journeys.len();
        let total_distance_km: f64 = journeys.iter().filter_map(|j| j.distance_km).sum();
        let total_fare: Decimal = journeys.iter().filter_map(|j| j.fare).sum();
        let average_fare = if total_journeys > 0 {
            (total_fare / Decimal::from(total_journeys as u64)).round_dp(2)
        } else {
            Decimal::ZERO
        };

        // Most frequently visited station across origins and destinations.
        let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for journey in &journeys {
            *counts.entry(journey.origin_station_id.as_str()).or_default() += 1;
            if let Some(dest) = &journey.destination_station_id {
                *counts.entry(dest.as_str()).or_default() += 1;
            }
        }
        let favorite_station = match counts.into_iter().max_by_key(|(_, n)| *n) {
            Some((station_id, _)) => self
                .store
                .get_station(station_id)
                .await?
                .map(|s| s.name),
            None => None,
        };

        Ok(JourneyStats {
            total_journeys,
            total_distance_km: (total_distance_km * 100.0).round() / 100.0,
            total_fare,
            average_fare,
            favorite_station,
        })
    }
}

/// A unique violation on the one-active-journey index means another entry
/// scan won the race.
fn map_active_journey_conflict(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(ref db) = err {
        if db.constraint() == Some("idx_journeys_one_active") {
            return AppError::JourneyAlreadyActive;
        }
    }
    AppError::Database(err)
}
