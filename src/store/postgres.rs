use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::fare::CardClass;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

// ── Domain enums (stored as TEXT) ─────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JourneyStatus {
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryMethod {
    TokenScan,
    Geofence,
    Manual,
}

// ── Row types ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StationRow {
    pub id: String,
    pub name: String,
    pub code: String,
    pub line: String,
    pub latitude: f64,
    pub longitude: f64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StationRow {
    pub fn location(&self) -> crate::fare::GeoPoint {
        crate::fare::GeoPoint::new(self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CardRow {
    pub id: Uuid,
    pub rider_id: String,
    pub card_number: String,
    pub balance: Decimal,
    pub card_class: CardClass,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct JourneyRow {
    pub id: Uuid,
    pub rider_id: String,
    pub card_id: Uuid,
    pub origin_station_id: String,
    pub destination_station_id: Option<String>,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub entry_method: EntryMethod,
    pub exit_method: Option<EntryMethod>,
    pub entry_latitude: Option<f64>,
    pub entry_longitude: Option<f64>,
    pub exit_latitude: Option<f64>,
    pub exit_longitude: Option<f64>,
    pub fare: Option<Decimal>,
    pub distance_km: Option<f64>,
    pub duration_min: Option<i32>,
    pub status: JourneyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TransactionRow {
    pub id: Uuid,
    pub rider_id: String,
    pub card_id: Option<Uuid>,
    pub kind: String,
    pub amount: Decimal,
    pub status: String,
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Insert payloads ───────────────────────────────────────────

pub struct NewCard {
    pub rider_id: String,
    pub card_number: String,
    pub card_class: CardClass,
}

pub struct NewJourney {
    pub rider_id: String,
    pub card_id: Uuid,
    pub origin_station_id: String,
    pub entry_method: EntryMethod,
    pub entry_latitude: Option<f64>,
    pub entry_longitude: Option<f64>,
}

pub struct JourneyExit {
    pub journey_id: Uuid,
    pub destination_station_id: String,
    pub exit_method: EntryMethod,
    pub exit_latitude: Option<f64>,
    pub exit_longitude: Option<f64>,
    pub fare: Decimal,
    pub distance_km: f64,
    pub duration_min: i32,
    pub description: String,
}

pub struct NewScanLog {
    pub scanner_id: String,
    pub rider_id: Option<String>,
    pub station_id: Option<String>,
    pub journey_id: Option<Uuid>,
    pub direction: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

/// Outcome of the journey-completion transaction.
pub enum CompletionResult {
    Completed {
        journey: JourneyRow,
        balance: Decimal,
    },
    NotActive,
    InsufficientBalance,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -- Station Operations --

    pub async fn get_station(&self, id: &str) -> Result<Option<StationRow>, sqlx::Error> {
        sqlx::query_as::<_, StationRow>("SELECT * FROM stations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn list_stations(&self) -> Result<Vec<StationRow>, sqlx::Error> {
        sqlx::query_as::<_, StationRow>(
            "SELECT * FROM stations WHERE is_active ORDER BY line, name",
        )
        .fetch_all(&self.pool)
        .await
    }

    // -- Card Operations --

    pub async fn insert_card(&self, card: &NewCard) -> Result<CardRow, sqlx::Error> {
        sqlx::query_as::<_, CardRow>(
            r#"INSERT INTO metro_cards (rider_id, card_number, card_class)
               VALUES ($1, $2, $3)
               RETURNING *"#,
        )
        .bind(&card.rider_id)
        .bind(&card.card_number)
        .bind(card.card_class)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get_card(&self, id: Uuid) -> Result<Option<CardRow>, sqlx::Error> {
        sqlx::query_as::<_, CardRow>("SELECT * FROM metro_cards WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn list_cards(&self, rider_id: &str) -> Result<Vec<CardRow>, sqlx::Error> {
        sqlx::query_as::<_, CardRow>(
            "SELECT * FROM metro_cards WHERE rider_id = $1 ORDER BY created_at DESC",
        )
        .bind(rider_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn find_active_card(&self, rider_id: &str) -> Result<Option<CardRow>, sqlx::Error> {
        sqlx::query_as::<_, CardRow>(
            "SELECT * FROM metro_cards WHERE rider_id = $1 AND is_active ORDER BY created_at ASC LIMIT 1",
        )
        .bind(rider_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Conditional debit: decrements only when the balance covers `amount`.
    /// Returns the new balance, or `None` when the card could not cover the
    /// debit. The single UPDATE serializes concurrent operations per card
    /// and keeps the balance non-negative.
    pub async fn debit_card<'e, E>(
        exec: E,
        card_id: Uuid,
        amount: Decimal,
    ) -> Result<Option<Decimal>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar::<_, Decimal>(
            r#"UPDATE metro_cards
               SET balance = balance - $2, updated_at = NOW()
               WHERE id = $1 AND balance >= $2
               RETURNING balance"#,
        )
        .bind(card_id)
        .bind(amount)
        .fetch_optional(exec)
        .await
    }

    /// Unconditional atomic credit. Returns the new balance, or `None` when
    /// the card does not exist.
    pub async fn credit_card<'e, E>(
        exec: E,
        card_id: Uuid,
        amount: Decimal,
    ) -> Result<Option<Decimal>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar::<_, Decimal>(
            r#"UPDATE metro_cards
               SET balance = balance + $2, updated_at = NOW()
               WHERE id = $1
               RETURNING balance"#,
        )
        .bind(card_id)
        .bind(amount)
        .fetch_optional(exec)
        .await
    }

    // -- Journey Operations --

    /// Create an IN_PROGRESS journey. Concurrent starts for one rider race
    /// on the partial unique index `idx_journeys_one_active`; callers map
    /// that violation to `JourneyAlreadyActive`.
    pub async fn insert_journey(&self, journey: &NewJourney) -> Result<JourneyRow, sqlx::Error> {
        sqlx::query_as::<_, JourneyRow>(
            r#"INSERT INTO journeys
                   (rider_id, card_id, origin_station_id, entry_method, entry_latitude, entry_longitude)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING *"#,
        )
        .bind(&journey.rider_id)
        .bind(journey.card_id)
        .bind(&journey.origin_station_id)
        .bind(journey.entry_method)
        .bind(journey.entry_latitude)
        .bind(journey.entry_longitude)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get_journey(&self, id: Uuid) -> Result<Option<JourneyRow>, sqlx::Error> {
        sqlx::query_as::<_, JourneyRow>("SELECT * FROM journeys WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn active_journey(&self, rider_id: &str) -> Result<Option<JourneyRow>, sqlx::Error> {
        sqlx::query_as::<_, JourneyRow>(
            "SELECT * FROM journeys WHERE rider_id = $1 AND status = 'IN_PROGRESS' LIMIT 1",
        )
        .bind(rider_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn journey_history(
        &self,
        rider_id: &str,
        limit: i64,
    ) -> Result<Vec<JourneyRow>, sqlx::Error> {
        sqlx::query_as::<_, JourneyRow>(
            "SELECT * FROM journeys WHERE rider_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(rider_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn completed_journeys(
        &self,
        rider_id: &str,
    ) -> Result<Vec<JourneyRow>, sqlx::Error> {
        sqlx::query_as::<_, JourneyRow>(
            "SELECT * FROM journeys WHERE rider_id = $1 AND status = 'COMPLETED'",
        )
        .bind(rider_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Cancel an IN_PROGRESS journey. Returns `None` when the journey is
    /// missing or no longer active.
    pub async fn cancel_journey(&self, id: Uuid) -> Result<Option<JourneyRow>, sqlx::Error> {
        sqlx::query_as::<_, JourneyRow>(
            r#"UPDATE journeys
               SET status = 'CANCELLED', updated_at = NOW()
               WHERE id = $1 AND status = 'IN_PROGRESS'
               RETURNING *"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Close a journey and settle the fare in one transaction: mark the
    /// journey COMPLETED, debit the journey's bound card, journal the
    /// payment. Any failure rolls back the whole settlement — a journey is
    /// never COMPLETED without its debit.
    pub async fn complete_journey(
        &self,
        card_id: Uuid,
        rider_id: &str,
        exit: &JourneyExit,
    ) -> Result<CompletionResult, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let journey = sqlx::query_as::<_, JourneyRow>(
            r#"UPDATE journeys
               SET destination_station_id = $2,
                   exit_time = NOW(),
                   exit_method = $3,
                   exit_latitude = $4,
                   exit_longitude = $5,
                   fare = $6,
                   distance_km = $7,
                   duration_min = $8,
                   status = 'COMPLETED',
                   updated_at = NOW()
               WHERE id = $1 AND status = 'IN_PROGRESS'
               RETURNING *"#,
        )
        .bind(exit.journey_id)
        .bind(&exit.destination_station_id)
        .bind(exit.exit_method)
        .bind(exit.exit_latitude)
        .bind(exit.exit_longitude)
        .bind(exit.fare)
        .bind(exit.distance_km)
        .bind(exit.duration_min)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(journey) = journey else {
            tx.rollback().await?;
            return Ok(CompletionResult::NotActive);
        };

        let balance = Self::debit_card(&mut *tx, card_id, exit.fare).await?;
        let Some(balance) = balance else {
            tx.rollback().await?;
            return Ok(CompletionResult::InsufficientBalance);
        };

        sqlx::query(
            r#"INSERT INTO transactions (rider_id, card_id, kind, amount, status, description)
               VALUES ($1, $2, 'JOURNEY_PAYMENT', $3, 'SUCCESS', $4)"#,
        )
        .bind(rider_id)
        .bind(card_id)
        .bind(-exit.fare)
        .bind(&exit.description)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(CompletionResult::Completed { journey, balance })
    }

    // -- Transaction Operations --

    pub async fn get_transaction_by_order(
        &self,
        order_id: &str,
    ) -> Result<Option<TransactionRow>, sqlx::Error> {
        sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Record a confirmed recharge, keyed on the payment-gateway order id.
    /// Returns `None` when the order was already recorded — the caller must
    /// not credit again (exactly-once credit per confirmed order).
    pub async fn insert_recharge_if_new<'e, E>(
        exec: E,
        rider_id: &str,
        card_id: Uuid,
        amount: Decimal,
        order_id: &str,
        payment_id: &str,
    ) -> Result<Option<TransactionRow>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, TransactionRow>(
            r#"INSERT INTO transactions (rider_id, card_id, kind, amount, status, order_id, payment_id, description)
               VALUES ($1, $2, 'CARD_RECHARGE', $3, 'SUCCESS', $4, $5, 'Card recharge')
               ON CONFLICT (order_id) DO NOTHING
               RETURNING *"#,
        )
        .bind(rider_id)
        .bind(card_id)
        .bind(amount)
        .bind(order_id)
        .bind(payment_id)
        .fetch_optional(exec)
        .await
    }

    /// Best-effort marker for failed confirmations; ignores unknown orders.
    pub async fn mark_transaction_failed(&self, order_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE transactions SET status = 'FAILED', updated_at = NOW() WHERE order_id = $1",
        )
        .bind(order_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- Scanner Operations --

    pub async fn scanner_bound_to(
        &self,
        scanner_id: &str,
        station_id: &str,
        direction: &str,
    ) -> anyhow::Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS(
                   SELECT 1 FROM scanners
                   WHERE id = $1 AND station_id = $2 AND direction = $3 AND is_active
               )"#,
        )
        .bind(scanner_id)
        .bind(station_id)
        .bind(direction)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    // -- Scan Log --

    /// Best-effort audit insert; callers swallow the error.
    pub async fn insert_scan_log(&self, log: &NewScanLog) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO scan_logs (scanner_id, rider_id, station_id, journey_id, direction, success, error)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(&log.scanner_id)
        .bind(&log.rider_id)
        .bind(&log.station_id)
        .bind(log.journey_id)
        .bind(&log.direction)
        .bind(log.success)
        .bind(&log.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
