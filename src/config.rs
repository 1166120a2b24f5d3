use serde::Deserialize;

use crate::fare::FareSchedule;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Shared secret used to verify payment-gateway confirmation signatures.
    pub payment_secret: String,
    /// Optional secret for HMAC-signing outbound webhook notifications.
    pub webhook_secret: Option<String>,
    /// Comma-separated list of webhook URLs to notify on journey/card events.
    pub webhook_urls: Vec<String>,
    /// Gate token validity window in seconds. Default: 300 (5 minutes).
    pub token_validity_secs: i64,
    /// Minimum card balance required to start a journey. Default: 10.
    pub min_entry_balance: u32,
    /// Balance below which a low-balance notification fires. Default: 50.
    pub low_balance_threshold: u32,
    pub fares: FareSchedule,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let payment_secret = std::env::var("FAREGATE_PAYMENT_SECRET")
        .unwrap_or_else(|_| "CHANGE_ME_PAYMENT_SECRET".into());

    if payment_secret == "CHANGE_ME_PAYMENT_SECRET" {
        let env_mode = std::env::var("FAREGATE_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "FAREGATE_PAYMENT_SECRET is still the insecure placeholder. \
                 Set the payment-gateway signing secret before running in production."
            );
        }
        eprintln!("⚠️  FAREGATE_PAYMENT_SECRET is not set — using insecure placeholder. Recharge confirmations will not verify against a real gateway.");
    }

    Ok(Config {
        port: std::env::var("FAREGATE_PORT")
            .unwrap_or_else(|_| "8090".into())
            .parse()
            .unwrap_or(8090),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/faregate".into()),
        payment_secret,
        webhook_secret: std::env::var("FAREGATE_WEBHOOK_SECRET").ok(),
        webhook_urls: std::env::var("FAREGATE_WEBHOOK_URLS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        token_validity_secs: std::env::var("FAREGATE_TOKEN_VALIDITY_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300),
        min_entry_balance: std::env::var("FAREGATE_MIN_ENTRY_BALANCE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10),
        low_balance_threshold: std::env::var("FAREGATE_LOW_BALANCE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(50),
        fares: FareSchedule {
            base_fare: env_f64("FAREGATE_BASE_FARE", 10.0),
            per_km_rate: env_f64("FAREGATE_PER_KM_RATE", 2.0),
            max_fare: env_f64("FAREGATE_MAX_FARE", 60.0),
        },
    })
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fare_defaults() {
        let schedule = FareSchedule {
            base_fare: env_f64("FAREGATE_TEST_UNSET_BASE", 10.0),
            per_km_rate: env_f64("FAREGATE_TEST_UNSET_RATE", 2.0),
            max_fare: env_f64("FAREGATE_TEST_UNSET_MAX", 60.0),
        };
        assert_eq!(schedule.base_fare, 10.0);
        assert_eq!(schedule.per_km_rate, 2.0);
        assert_eq!(schedule.max_fare, 60.0);
    }
}
