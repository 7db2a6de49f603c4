//! Link storage and the per-link audit sink, backed by Postgres.

use chrono::Utc;
use diesel::PgConnection;
use diesel::prelude::*;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::{info, warn};
use std::sync::{Mutex, PoisonError};

use super::models::{Link, LogLevel, NewLog};
use crate::schema::{links, logs};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Debug)]
pub enum StorageError {
    Connection(String),
    Query(diesel::result::Error),
    Migration(String),
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StorageError::Connection(s) => write!(f, "DB connection failed: {}", s),
            StorageError::Query(e) => write!(f, "query failed: {}", e),
            StorageError::Migration(s) => write!(f, "applying database migrations failed: {}", s),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Query(e) => Some(e),
            _ => None,
        }
    }
}

impl From<diesel::result::Error> for StorageError {
    fn from(value: diesel::result::Error) -> Self {
        StorageError::Query(value)
    }
}

/// Source of truth for which upstream accounts are polled.
pub trait LinkStorage: Send + Sync {
    fn links(&self) -> Result<Vec<Link>, StorageError>;
    fn links_for_user(&self, user_id: &str) -> Result<Vec<Link>, StorageError>;
}

/// Per-link audit trail. Failures to record are not reported to the caller.
pub trait AuditLog: Send + Sync {
    fn log(&self, link_id: &str, level: LogLevel, message: &str);
}

pub struct PgStorage {
    conn: Mutex<PgConnection>,
    log_only_errors: bool,
}

impl PgStorage {
    pub fn connect(database_url: &str, log_only_errors: bool) -> Result<Self, StorageError> {
        let conn = PgConnection::establish(database_url).map_err(|e| StorageError::Connection(e.to_string()))?;
        info!("Connected to database");
        Ok(PgStorage {
            conn: Mutex::new(conn),
            log_only_errors,
        })
    }

    pub fn apply_migrations(&self) -> Result<(), StorageError> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| StorageError::Migration(e.to_string()))?;
        if applied.is_empty() {
            info!("Database schema is up to date; no migrations were applied");
        } else {
            let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
            info!("Applied {} database migration(s): {}", applied.len(), names);
        }
        Ok(())
    }
}

impl LinkStorage for PgStorage {
    fn links(&self) -> Result<Vec<Link>, StorageError> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(links::table
            .select(Link::as_select())
            .order(links::created_at.asc())
            .load(&mut *conn)?)
    }

    fn links_for_user(&self, user_id: &str) -> Result<Vec<Link>, StorageError> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(links::table
            .filter(links::user_id.eq(user_id))
            .select(Link::as_select())
            .order(links::created_at.asc())
            .load(&mut *conn)?)
    }
}

impl AuditLog for PgStorage {
    fn log(&self, link_id: &str, level: LogLevel, message: &str) {
        if !should_persist(self.log_only_errors, level) {
            return;
        }
        let row = NewLog {
            link_id,
            time: Utc::now(),
            level: level.as_str(),
            message,
        };
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = diesel::insert_into(logs::table).values(&row).execute(&mut *conn) {
            warn!("link {}: failed to store audit entry: {}", link_id, e);
        }
    }
}

fn should_persist(log_only_errors: bool, level: LogLevel) -> bool {
    !log_only_errors || level == LogLevel::Error
}
