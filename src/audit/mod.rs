/*!
 * Audit trail of translation runs.
 *
 * Every document run and each of its segment outcomes is recorded in a
 * local SQLite database so decisions can be reviewed after the fact.
 */

pub mod connection;
pub mod models;
pub mod observer;
pub mod repository;
pub mod schema;

pub use connection::AuditConnection;
pub use models::{OutcomeRecord, RunRecord, RunStatus};
pub use observer::AuditObserver;
pub use repository::AuditRepository;
