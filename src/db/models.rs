//! Diesel row types for stored links and audit log entries.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use std::fmt::{Debug, Formatter};

use crate::schema;

/// A user's connected SST account.
#[derive(Clone, PartialEq, Eq, Queryable, Identifiable, Selectable)]
#[diesel(table_name = schema::links)]
pub struct Link {
    pub id: String,
    pub user_id: String,
    pub sst_email: String,
    pub sst_password: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Link {
    /// Same link with the same upstream credentials.
    pub fn credentials_match(&self, other: &Link) -> bool {
        self.id == other.id && self.sst_email == other.sst_email && self.sst_password == other.sst_password
    }
}

impl Debug for Link {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("sst_email", &self.sst_email)
            .field("sst_password", &"***")
            .finish()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "Error",
            LogLevel::Info => "Info",
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::logs)]
pub struct NewLog<'a> {
    pub link_id: &'a str,
    pub time: DateTime<Utc>,
    pub level: &'a str,
    pub message: &'a str,
}
