//! PostgreSQL row source for vector-sync
//!
//! Polls a table for rows whose last-modified column moved past the sync
//! watermark. Detection relies entirely on the table's own timestamp column;
//! no triggers, audit tables or replication slots are installed.

mod client;
mod query;
mod source;

pub use client::new_postgresql_client;
pub use query::{build_change_query, quote_ident, KeyKind};
pub use source::PostgresRowSource;

use std::time::Duration;

/// PostgreSQL source connection options
#[derive(Clone, Debug)]
pub struct SourceOpts {
    /// PostgreSQL connection string (URI or key=value form)
    pub connection_string: String,
    /// Schema that holds the watched table
    pub schema: String,
    /// Upper bound on a single fetch, including connecting
    pub fetch_timeout: Duration,
}

impl SourceOpts {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            schema: "public".to_string(),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}
