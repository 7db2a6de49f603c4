pub mod models;
pub mod storage;

pub use models::{Link, LogLevel};
pub use storage::{AuditLog, LinkStorage, PgStorage, StorageError};
