//! Queues one pending follow-up message per triggered agent.
//!
//! Nothing here sends mail. Messages stay `pending` until a delivery worker
//! picks them up.

use chrono::Utc;
use uuid::Uuid;

use crate::agents::model::Agent;
use crate::leads::model::{Lead, Message, MessageStatus};

/// Build the pending messages for `lead`, one per agent, in agent order.
pub fn queue_messages(lead: &Lead, agents: &[Agent], score: f64) -> Vec<Message> {
    let now = Utc::now();
    agents
        .iter()
        .map(|agent| Message {
            id: Uuid::new_v4().to_string(),
            lead_id: lead.id.clone(),
            user_id: lead.user_id.clone(),
            agent_id: agent.id.clone(),
            subject: format!("Follow-up for {} (Score: {})", lead.name, score),
            content: format!("Agent {} would send: {}", agent.name, agent.system_prompt),
            status: MessageStatus::Pending,
            created_at: now,
            sent_at: None,
        })
        .collect()
}
