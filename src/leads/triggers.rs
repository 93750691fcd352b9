//! Which agents fire for a freshly scored lead.

use tracing::debug;

use crate::agents::model::Agent;
use crate::error::DatabaseError;
use crate::store::Database;

/// Leads must score strictly above this to trigger agents.
pub const TRIGGER_THRESHOLD: f64 = 6.0;

pub fn should_trigger(score: f64) -> bool {
    score > TRIGGER_THRESHOLD
}

/// Active agents attached to `webhook_id`, in association order.
///
/// Returns an empty list without touching the store when the score does not
/// clear the threshold.
pub async fn resolve_triggered_agents(
    db: &dyn Database,
    webhook_id: &str,
    score: f64,
) -> Result<Vec<Agent>, DatabaseError> {
    if !should_trigger(score) {
        debug!(webhook_id, score, "Score below trigger threshold");
        return Ok(Vec::new());
    }

    let agents = db.get_active_agents_for_webhook(webhook_id).await?;
    debug!(webhook_id, score, agents = agents.len(), "Resolved triggered agents");
    Ok(agents)
}
