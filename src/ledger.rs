//! Stored-value card ledger: the only code path that moves money on a card.
//!
//! Debits are conditional (the balance must cover the amount) and credits
//! land only after the payment gateway's confirmation signature verifies.
//! Idempotency for recharges is keyed on the gateway order id — one credit
//! per confirmed order, ever.

use hmac::{Hmac, Mac};
use rand::Rng;
use rust_decimal::Decimal;
use sha2::Sha256;
use uuid::Uuid;

use crate::errors::AppError;
use crate::fare::CardClass;
use crate::notification::{NotificationEvent, Notifier};
use crate::store::postgres::{CardRow, NewCard, PgStore, TransactionRow};

#[derive(Clone)]
pub struct CardLedger {
    store: PgStore,
    payment_secret: String,
    notifier: Notifier,
}

/// Payment-gateway confirmation callback payload.
#[derive(Debug, Clone)]
pub struct RechargeConfirmation {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
    pub rider_id: String,
    pub amount: Decimal,
}

/// Result of a confirmation: the journal row, plus the new balance when the
/// credit was applied by this call (absent on idempotent replays).
pub struct RechargeOutcome {
    pub transaction: TransactionRow,
    pub balance: Option<Decimal>,
    pub already_processed: bool,
}

impl CardLedger {
    pub fn new(store: PgStore, payment_secret: String, notifier: Notifier) -> Self {
        Self {
            store,
            payment_secret,
            notifier,
        }
    }

    /// Debit `amount` from a card. Rejected with `InsufficientBalance` when
    /// the balance does not cover it — never partially applied.
    pub async fn debit(&self, card_id: Uuid, amount: Decimal) -> Result<Decimal, AppError> {
        if amount <= Decimal::ZERO {
            return Err(AppError::InvalidAmount);
        }
        match PgStore::debit_card(self.store.pool(), card_id, amount).await? {
            Some(balance) => Ok(balance),
            None => {
                // Conditional UPDATE matched nothing: either the card is
                // unknown or the balance could not cover the debit.
                match self.store.get_card(card_id).await? {
                    Some(_) => Err(AppError::InsufficientBalance),
                    None => Err(AppError::InvalidCard),
                }
            }
        }
    }

    /// Credit `amount` to a card. Callers are responsible for idempotency;
    /// the recharge-confirmation flow enforces it via the order id.
    pub async fn credit(&self, card_id: Uuid, amount: Decimal) -> Result<Decimal, AppError> {
        if amount <= Decimal::ZERO {
            return Err(AppError::InvalidAmount);
        }
        PgStore::credit_card(self.store.pool(), card_id, amount)
            .await?
            .ok_or(AppError::InvalidCard)
    }

    /// Issue a new stored-value card for a rider.
    pub async fn issue_card(
        &self,
        rider_id: &str,
        card_class: CardClass,
    ) -> Result<CardRow, AppError> {
        let card = NewCard {
            rider_id: rider_id.to_string(),
            card_number: generate_card_number(),
            card_class,
        };
        let row = self.store.insert_card(&card).await?;
        tracing::info!(rider_id, card_id = %row.id, "metro card issued");
        Ok(row)
    }

    pub async fn get_card(&self, card_id: Uuid) -> Result<Option<CardRow>, AppError> {
        Ok(self.store.get_card(card_id).await?)
    }

    pub async fn list_cards(&self, rider_id: &str) -> Result<Vec<CardRow>, AppError> {
        Ok(self.store.list_cards(rider_id).await?)
    }

    /// Apply a confirmed payment-gateway recharge.
    ///
    /// Verifies the gateway signature over `order_id|payment_id`, then
    /// records the transaction and credits the rider's active card in one
    /// database transaction. Replays of an already-confirmed order return
    /// the recorded transaction without crediting again.
    pub async fn confirm_recharge(
        &self,
        confirmation: &RechargeConfirmation,
    ) -> Result<RechargeOutcome, AppError> {
        if confirmation.amount <= Decimal::ZERO {
            return Err(AppError::InvalidAmount);
        }

        let body = format!("{}|{}", confirmation.order_id, confirmation.payment_id);
        let expected = hmac_hex(&self.payment_secret, body.as_bytes());
        if expected != confirmation.signature {
            tracing::warn!(
                order_id = %confirmation.order_id,
                "payment signature verification failed"
            );
            // Best-effort failure marker; the rejection stands either way.
            if let Err(e) = self.store.mark_transaction_failed(&confirmation.order_id).await {
                tracing::warn!(error = %e, "failed to mark transaction failed");
            }
            return Err(AppError::InvalidSignature);
        }

        let card = self
            .store
            .find_active_card(&confirmation.rider_id)
            .await?
            .ok_or(AppError::NoActiveCard)?;

        let mut tx = self.store.pool().begin().await.map_err(AppError::Database)?;

        let inserted = PgStore::insert_recharge_if_new(
            &mut *tx,
            &confirmation.rider_id,
            card.id,
            confirmation.amount,
            &confirmation.order_id,
            &confirmation.payment_id,
        )
        .await?;

        let Some(transaction) = inserted else {
            tx.rollback().await.map_err(AppError::Database)?;
            // Idempotent replay: surface the recorded transaction.
            let existing = self
                .store
                .get_transaction_by_order(&confirmation.order_id)
                .await?
                .ok_or(AppError::OrderNotFound)?;
            tracing::info!(order_id = %confirmation.order_id, "recharge already processed");
            return Ok(RechargeOutcome {
                transaction: existing,
                balance: None,
                already_processed: true,
            });
        };

        let balance = PgStore::credit_card(&mut *tx, card.id, confirmation.amount)
            .await?
            .ok_or(AppError::InvalidCard)?;

        tx.commit().await.map_err(AppError::Database)?;

        tracing::info!(
            order_id = %confirmation.order_id,
            card_id = %card.id,
            amount = %confirmation.amount,
            balance = %balance,
            "recharge credited"
        );

        self.notifier.publish(NotificationEvent::recharge_success(
            &confirmation.rider_id,
            confirmation.amount,
            balance,
        ));

        Ok(RechargeOutcome {
            transaction,
            balance: Some(balance),
            already_processed: false,
        })
    }
}

/// Compute the expected gateway signature: HMAC-SHA256 hex over the payload.
fn hmac_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// 16-digit card number with the issuer prefix.
fn generate_card_number() -> String {
    let mut rng = rand::thread_rng();
    let digits: String = (0..12).map(|_| rng.gen_range(0..10).to_string()).collect();
    format!("6011{}", digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_number_format() {
        let number = generate_card_number();
        assert_eq!(number.len(), 16);
        assert!(number.starts_with("6011"));
        assert!(number.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_signature_matches_gateway_scheme() {
        // Signature covers "order|payment" with the shared secret.
        let sig = hmac_hex("secret", b"order_123|pay_456");
        assert_eq!(sig, hmac_hex("secret", b"order_123|pay_456"));
        assert_ne!(sig, hmac_hex("other", b"order_123|pay_456"));
        assert_ne!(sig, hmac_hex("secret", b"order_123|pay_457"));
    }
}
