use async_trait::async_trait;

use super::token::GateDirection;
use crate::store::postgres::PgStore;

/// External scanner-station binding check: "is scanner X authorized for
/// station Y, direction Z?". Answered from the scanners table in production;
/// tests substitute their own implementation.
#[async_trait]
pub trait ScannerDirectory: Send + Sync {
    async fn is_authorized(
        &self,
        scanner_id: &str,
        station_id: &str,
        direction: GateDirection,
    ) -> anyhow::Result<bool>;
}

pub struct PgScannerDirectory {
    store: PgStore,
}

impl PgScannerDirectory {
    pub fn new(store: PgStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ScannerDirectory for PgScannerDirectory {
    async fn is_authorized(
        &self,
        scanner_id: &str,
        station_id: &str,
        direction: GateDirection,
    ) -> anyhow::Result<bool> {
        self.store
            .scanner_bound_to(scanner_id, station_id, direction.as_str())
            .await
    }
}
