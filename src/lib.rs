//! Closelead: webhook lead intake with LLM scoring and agent follow-ups.

pub mod agents;
pub mod config;
pub mod error;
pub mod integrations;
pub mod leads;
pub mod llm;
pub mod server;
pub mod store;
pub mod webhooks;
