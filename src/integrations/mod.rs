//! Third-party integrations brokered through an OAuth connection platform.
//!
//! Gmail is the only integration type. The broker performs the OAuth dance
//! and executes Gmail actions; this module tracks each owner's connection
//! state locally.

pub mod broker;
pub mod model;
pub mod routes;
pub mod service;

pub use broker::{ComposioBroker, ConnectionBroker};
pub use model::{Integration, IntegrationStatus, IntegrationType};
pub use service::{IntegrationService, POLL_INTERVAL, poll_until_settled};
