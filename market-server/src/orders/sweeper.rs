//! Background expiration sweep for unpaid orders.

use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::db::orders;
use crate::db::products;
use crate::error::AppResult;
use crate::orders::status::ItemStatus;
use crate::util::now_millis;

const EXPIRED_REASON: &str = "Order expired after 30 minutes";

pub struct ExpirationSweeper {
    pool: SqlitePool,
    interval: Duration,
    shutdown: CancellationToken,
    running: Mutex<()>,
}

impl ExpirationSweeper {
    pub fn new(pool: SqlitePool, interval_secs: u64, shutdown: CancellationToken) -> Self {
        Self {
            pool,
            interval: Duration::from_secs(interval_secs),
            shutdown,
            running: Mutex::new(()),
        }
    }

    /// Run until the shutdown token fires. A sweep error is logged and the
    /// loop keeps going; the next tick retries.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "expiration sweeper started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("expiration sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    // Single-flight: a sweep that outlives its interval must
                    // not be run concurrently with the next tick's.
                    let Ok(_guard) = self.running.try_lock() else {
                        warn!("previous sweep still running, skipping tick");
                        continue;
                    };
                    match sweep_expired(&self.pool).await {
                        Ok(0) => {}
                        Ok(n) => info!(expired = n, "expired unpaid orders"),
                        Err(err) => error!(%err, "expiration sweep failed"),
                    }
                }
            }
        }
    }
}

/// Expire every order still pending past its payment deadline, restoring
/// the reserved stock. The whole batch commits as one unit; an error rolls
/// all of it back for the next tick to retry. The guarded per-order update
/// means a payment confirmed between selection and expiry wins.
pub async fn sweep_expired(pool: &SqlitePool) -> AppResult<u64> {
    let now = now_millis();
    let mut expired = 0u64;

    let mut tx = pool.begin().await?;
    let candidates = orders::expired_pending_ids(&mut tx, now).await?;

    for order_id in candidates {
        if !orders::mark_expired(&mut tx, &order_id, EXPIRED_REASON, now).await? {
            continue;
        }
        let items = orders::items_for(&mut *tx, &order_id).await?;
        for item in &items {
            products::restore_stock(&mut tx, &item.product_id, item.quantity).await?;
        }
        orders::set_items_status(&mut tx, &order_id, ItemStatus::Expired.as_db(), now).await?;
        expired += 1;
    }

    tx.commit().await?;
    Ok(expired)
}
