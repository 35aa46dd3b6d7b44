// QoreDB Link - linked (federated) tables
// Core library

pub mod engine;
pub mod link;
pub mod observability;

pub use engine::drivers::mysql::MySqlDriver;
pub use engine::drivers::postgres::PostgresDriver;
pub use engine::drivers::sqlite::SqliteDriver;
pub use engine::{EngineError, EngineResult, HostCatalog, RemoteDriver, SessionContext};
pub use link::{LinkConfig, LinkedTable, UpdateOutcome};
