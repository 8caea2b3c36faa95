//! PostgreSQL implementation of [`RowSource`].

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sync_core::{ChangeQuery, RowKey, RowSource, SyncError, WatchedRow};
use tokio::sync::{Mutex, MutexGuard};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;

use crate::client::new_postgresql_client;
use crate::query::{build_change_query, KeyKind};
use crate::SourceOpts;

/// Row source backed by a PostgreSQL table.
///
/// Holds a single connection and reconnects lazily when it was closed, so a
/// database restart shows up as one `SourceUnavailable` cycle rather than a
/// permanently broken pipeline.
pub struct PostgresRowSource {
    opts: SourceOpts,
    client: Mutex<Option<Client>>,
    key_kinds: Mutex<HashMap<String, KeyKind>>,
}

impl PostgresRowSource {
    pub fn new(opts: SourceOpts) -> Self {
        Self {
            opts,
            client: Mutex::new(None),
            key_kinds: Mutex::new(HashMap::new()),
        }
    }

    /// Connect and verify that the table holds every column the pipeline reads.
    ///
    /// Returns how the primary key will be compared.
    pub async fn initialize(
        &self,
        table: &str,
        key_column: &str,
        timestamp_column: &str,
        columns: &[String],
    ) -> Result<KeyKind, SyncError> {
        let types = self.column_types(table).await?;
        if types.is_empty() {
            return Err(SyncError::Configuration(format!(
                "table '{}.{table}' does not exist or has no visible columns",
                self.opts.schema
            )));
        }

        let required = [key_column, timestamp_column]
            .into_iter()
            .chain(columns.iter().map(String::as_str));
        let missing: Vec<&str> = required.filter(|c| !types.contains_key(*c)).collect();
        if !missing.is_empty() {
            return Err(SyncError::Configuration(format!(
                "table '{}.{table}' is missing column(s): {}",
                self.opts.schema,
                missing.join(", ")
            )));
        }

        let ts_type = types.get(timestamp_column).map(String::as_str).unwrap_or("");
        if !ts_type.starts_with("timestamp") && ts_type != "date" {
            return Err(SyncError::Configuration(format!(
                "column '{timestamp_column}' has type '{ts_type}', expected a timestamp"
            )));
        }
        if ts_type == "timestamp without time zone" {
            tracing::warn!(
                "Column '{timestamp_column}' has no time zone; values are interpreted in the session time zone"
            );
        }

        let key_kind = types
            .get(key_column)
            .map(|t| KeyKind::from_data_type(t))
            .unwrap_or(KeyKind::Text);
        self.key_kinds.lock().await.insert(table.to_string(), key_kind);
        tracing::info!(
            "PostgreSQL source ready: {}.{table} (key '{key_column}' as {key_kind:?}, {} embedding column(s))",
            self.opts.schema,
            columns.len()
        );
        Ok(key_kind)
    }

    async fn column_types(&self, table: &str) -> Result<HashMap<String, String>, SyncError> {
        let timeout = self.opts.fetch_timeout;
        let rows = tokio::time::timeout(timeout, async {
            let guard = self.connected().await?;
            let client = live(&guard)?;
            client
                .query(
                    "SELECT column_name, data_type FROM information_schema.columns \
                     WHERE table_schema = $1 AND table_name = $2",
                    &[&self.opts.schema, &table],
                )
                .await
                .map_err(map_pg_error)
        })
        .await
        .map_err(|_| timed_out(timeout))??;
        Ok(rows
            .iter()
            .map(|row| (row.get::<_, String>(0), row.get::<_, String>(1)))
            .collect())
    }

    async fn key_kind(&self, query: &ChangeQuery) -> Result<KeyKind, SyncError> {
        let cached = self.key_kinds.lock().await.get(&query.table).copied();
        if let Some(kind) = cached {
            return Ok(kind);
        }
        self.initialize(
            &query.table,
            &query.key_column,
            &query.timestamp_column,
            &query.columns,
        )
        .await
    }

    /// Lock the connection, reconnecting first if it was never opened or has closed.
    async fn connected(&self) -> Result<MutexGuard<'_, Option<Client>>, SyncError> {
        let mut guard = self.client.lock().await;
        if guard.as_ref().map_or(true, Client::is_closed) {
            tracing::debug!("Connecting to PostgreSQL");
            *guard = Some(new_postgresql_client(&self.opts.connection_string).await?);
        }
        Ok(guard)
    }
}

#[async_trait]
impl RowSource for PostgresRowSource {
    fn source_type(&self) -> &'static str {
        "postgresql"
    }

    async fn fetch_changed(&self, query: &ChangeQuery) -> Result<Vec<WatchedRow>, SyncError> {
        let key_kind = self.key_kind(query).await?;
        let sql = build_change_query(&self.opts.schema, query, key_kind);
        let since_ts: DateTime<Utc> = query.since.last_timestamp;
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let key_param = query
            .since
            .last_key
            .as_ref()
            .map(|key| KeyParam::bind(key, key_kind))
            .transpose()?;

        tracing::debug!("Fetching changes after {}: {sql}", query.since);
        let timeout = self.opts.fetch_timeout;
        let rows = tokio::time::timeout(timeout, async {
            let mut params: Vec<&(dyn ToSql + Sync)> = vec![&since_ts];
            if let Some(key) = &key_param {
                params.push(key.as_sql());
            }
            params.push(&limit);

            let guard = self.connected().await?;
            let client = live(&guard)?;
            client
                .query(sql.as_str(), &params)
                .await
                .map_err(map_pg_error)
        })
        .await
        .map_err(|_| timed_out(timeout))??;

        let mut changed = Vec::with_capacity(rows.len());
        for row in rows {
            let key = match key_kind {
                KeyKind::Integer => RowKey::Int(row.try_get(0).map_err(map_pg_error)?),
                KeyKind::Text => RowKey::Text(row.try_get(0).map_err(map_pg_error)?),
            };
            let updated_at: DateTime<Utc> = row.try_get(1).map_err(map_pg_error)?;
            let mut columns = BTreeMap::new();
            for (i, name) in query.columns.iter().enumerate() {
                let value: Option<String> = row.try_get(i + 2).map_err(map_pg_error)?;
                columns.insert(name.clone(), value);
            }
            changed.push(WatchedRow {
                key,
                columns,
                updated_at,
            });
        }
        Ok(changed)
    }
}

/// The watermark key converted to the parameter type the query compares against.
#[derive(Debug)]
enum KeyParam {
    Int(i64),
    Text(String),
}

impl KeyParam {
    fn bind(key: &RowKey, kind: KeyKind) -> Result<Self, SyncError> {
        match (kind, key) {
            (KeyKind::Integer, RowKey::Int(i)) => Ok(Self::Int(*i)),
            (KeyKind::Integer, RowKey::Text(s)) => s.parse().map(Self::Int).map_err(|_| {
                SyncError::Configuration(format!(
                    "watermark key '{s}' is not an integer but the primary key column is"
                ))
            }),
            (KeyKind::Text, key) => Ok(Self::Text(key.to_string())),
        }
    }

    fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            Self::Int(i) => i,
            Self::Text(s) => s,
        }
    }
}

fn live(guard: &Option<Client>) -> Result<&Client, SyncError> {
    guard
        .as_ref()
        .ok_or_else(|| SyncError::SourceUnavailable("PostgreSQL client unavailable".to_string()))
}

fn timed_out(timeout: Duration) -> SyncError {
    SyncError::SourceUnavailable(format!("PostgreSQL query timed out after {timeout:?}"))
}

/// Schema problems are configuration errors; everything else means the source is unusable right now.
fn map_pg_error(e: tokio_postgres::Error) -> SyncError {
    match e.code() {
        Some(code) if *code == SqlState::UNDEFINED_COLUMN || *code == SqlState::UNDEFINED_TABLE => {
            SyncError::Configuration(format!("PostgreSQL rejected the change query: {e}"))
        }
        _ => SyncError::SourceUnavailable(format!("PostgreSQL error: {e}")),
    }
}
