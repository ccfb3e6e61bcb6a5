//! Periodic expiry of stale pending plans and purge of expired cached contexts.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::context::ContextCache;
use crate::persistence::StoreError;
use crate::plan::{PlanStore, StatusUpdate};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub expired_plans: Vec<String>,
    pub purged_contexts: usize,
}

/// Reject every plan still `pending` more than `expiry` after creation.
///
/// A plan approved or rejected between the query and the update is left
/// alone; that race is logged, not reported as an error.
pub async fn expire_stale_plans(
    store: &dyn PlanStore,
    expiry: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<Vec<String>, StoreError> {
    let reason = format!("Expired after {} hours", expiry.num_hours());
    let mut expired = Vec::new();

    for plan in store.get_expired_plans(now - expiry).await? {
        let update = StatusUpdate::Reject {
            reason: reason.clone(),
        };
        match store.update_status(&plan.id, update).await {
            Ok(_) => {
                info!(plan = %plan.id, pr = plan.pr_number, "pending plan expired");
                expired.push(plan.id);
            }
            Err(StoreError::InvalidTransition { id, status }) => {
                debug!(plan = %id, %status, "plan moved on before it could expire");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(expired)
}

pub async fn sweep_once(
    store: &dyn PlanStore,
    cache: &dyn ContextCache,
    expiry: chrono::Duration,
) -> Result<SweepSummary, StoreError> {
    let expired_plans = expire_stale_plans(store, expiry, Utc::now()).await?;
    let purged_contexts = match cache.cleanup_expired().await {
        Ok(count) => count,
        Err(err) => {
            warn!(%err, "context cache cleanup failed");
            0
        }
    };
    Ok(SweepSummary {
        expired_plans,
        purged_contexts,
    })
}

/// Sweep every `interval` until Ctrl-C. Individual sweep failures are logged
/// and the loop keeps going.
pub async fn run_periodic(
    store: Arc<dyn PlanStore>,
    cache: Arc<dyn ContextCache>,
    expiry: chrono::Duration,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("sweep loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                match sweep_once(store.as_ref(), cache.as_ref(), expiry).await {
                    Ok(summary) => info!(
                        expired = summary.expired_plans.len(),
                        purged = summary.purged_contexts,
                        "sweep completed"
                    ),
                    Err(err) => error!(%err, "sweep failed"),
                }
            }
        }
    }
}
