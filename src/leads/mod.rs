//! Lead intake: extraction, scoring, agent triggers and the message outbox.

pub mod extract;
pub mod model;
pub mod outbox;
pub mod processor;
pub mod routes;
pub mod scoring;
pub mod triggers;

pub use model::{Lead, LeadScore, LeadStatus, Message, MessageStatus};
pub use processor::{IntakeOutcome, LeadProcessor};
pub use scoring::LeadScorer;
