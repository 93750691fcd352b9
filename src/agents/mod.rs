//! Automation agents attached to webhooks.

pub mod model;
pub mod routes;

pub use model::{Agent, AgentType, AgentWithWebhooks, NewAgent};
