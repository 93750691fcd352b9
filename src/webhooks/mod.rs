//! Webhook registry and the public intake endpoint.

pub mod model;
pub mod routes;

pub use model::{FormType, Webhook};
