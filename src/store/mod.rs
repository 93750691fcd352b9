//! Persistence layer: libSQL-backed storage for webhooks, leads, agents,
//! messages and integrations.

mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Database;
