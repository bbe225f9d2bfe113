use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::{
    config::AppConfig,
    db::OrmConn,
    entity::orders::{Column as OrderCol, Entity as Orders},
    error::AppResult,
    models::OrderStatus,
};

#[derive(Debug, Clone, Copy)]
pub struct SweeperConfig {
    /// Tick period.
    pub interval: Duration,
    /// Minimum time an order stays shipped before promotion.
    pub dwell: Duration,
}

impl From<&AppConfig> for SweeperConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            interval: config.sweep_interval,
            dwell: config.shipped_dwell,
        }
    }
}

/// Spawn the fulfillment sweeper. Each tick promotes every order that has
/// been shipped for at least the dwell time to ready-for-pickup. A failed
/// tick is logged and retried on the next one; the sweep predicate is on
/// status plus elapsed time, so re-running it is harmless.
pub fn spawn(orm: OrmConn, config: SweeperConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match promote_shipped(&orm, Utc::now(), config.dwell).await {
                Ok(0) => {}
                Ok(promoted) => {
                    tracing::info!(promoted, "orders promoted to ready for pickup");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "fulfillment sweep failed");
                }
            }
        }
    })
}

/// One sweep: a single UPDATE moving every qualifying shipped order to
/// ready-for-pickup. `now` is a parameter so tests can drive the clock.
pub async fn promote_shipped<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
    dwell: Duration,
) -> AppResult<u64> {
    // A dwell too large to represent means no order can qualify yet.
    let Some(cutoff) = promotion_cutoff(now, dwell) else {
        return Ok(0);
    };
    let cutoff: sea_orm::prelude::DateTimeWithTimeZone = cutoff.into();

    let result = Orders::update_many()
        .col_expr(
            OrderCol::Status,
            Expr::value(OrderStatus::ReadyForPickup.as_str()),
        )
        .filter(OrderCol::Status.eq(OrderStatus::Shipped.as_str()))
        .filter(OrderCol::ShippedAt.lte(cutoff))
        .exec(conn)
        .await?;

    Ok(result.rows_affected)
}

fn promotion_cutoff(now: DateTime<Utc>, dwell: Duration) -> Option<DateTime<Utc>> {
    let dwell = chrono::Duration::from_std(dwell).unwrap_or(chrono::Duration::MAX);
    now.checked_sub_signed(dwell)
}

#[cfg(test)]
mod tests {
    use super::promotion_cutoff;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    #[test]
    fn cutoff_is_now_minus_dwell() {
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
        let cutoff = promotion_cutoff(now, Duration::from_secs(20)).unwrap();
        assert_eq!(
            cutoff,
            Utc.with_ymd_and_hms(2026, 1, 10, 11, 59, 40).unwrap()
        );
    }

    #[test]
    fn unrepresentable_dwell_never_promotes_early() {
        assert!(promotion_cutoff(Utc::now(), Duration::from_secs(u64::MAX)).is_none());
    }
}
