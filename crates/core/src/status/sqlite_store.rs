//! SQLite-backed status store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::broadcast;

use crate::asset::FeatureType;

use super::{
    merge, AssetRecord, MergeDecision, StatusError, StatusFilter, StatusStore, StatusUpdate,
    TriggerClaim, TriggerKey, UpsertOutcome, UpsertResult,
};

/// Capacity of the change feed; slow subscribers observe `Lagged`.
const CHANGE_FEED_CAPACITY: usize = 1024;

const SELECT_COLUMNS: &str =
    "asset_id, feature_type, status, attempt, last_updated, error_detail, execution_id";

/// SQLite-backed status store with an in-process change feed.
pub struct SqliteStatusStore {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<AssetRecord>,
}

impl SqliteStatusStore {
    /// Create a new SQLite status store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, StatusError> {
        let conn = crate::db::open_shared(path).map_err(|e| StatusError::Database(e.to_string()))?;
        Self::from_connection(conn)
    }

    /// Create an in-memory SQLite status store (useful for testing).
    pub fn in_memory() -> Result<Self, StatusError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StatusError::Database(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StatusError> {
        Self::initialize_schema(&conn)?;
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            changes,
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StatusError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS asset_status (
                asset_id TEXT NOT NULL,
                feature_type TEXT NOT NULL,
                status TEXT NOT NULL,
                attempt INTEGER NOT NULL DEFAULT 1,
                last_updated TEXT NOT NULL,
                error_detail TEXT,
                execution_id TEXT NOT NULL,
                PRIMARY KEY (asset_id, feature_type)
            );

            CREATE INDEX IF NOT EXISTS idx_asset_status_status ON asset_status(status);
            CREATE INDEX IF NOT EXISTS idx_asset_status_last_updated ON asset_status(last_updated);

            CREATE TABLE IF NOT EXISTS trigger_claims (
                asset_id TEXT NOT NULL,
                feature_type TEXT NOT NULL,
                bucket TEXT NOT NULL,
                object_key TEXT NOT NULL,
                event_time TEXT NOT NULL,
                execution_id TEXT NOT NULL,
                claimed_at TEXT NOT NULL,
                PRIMARY KEY (asset_id, feature_type, bucket, object_key, event_time)
            );
            "#,
        )
        .map_err(|e| StatusError::Database(e.to_string()))
    }

    fn build_where_clause(filter: &StatusFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(feature_type) = filter.feature_type {
            conditions.push("feature_type = ?");
            params.push(Box::new(feature_type.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<AssetRecord> {
        let asset_id: String = row.get(0)?;
        let feature_type_str: String = row.get(1)?;
        let status_str: String = row.get(2)?;
        let attempt: u32 = row.get(3)?;
        let last_updated_str: String = row.get(4)?;
        let error_detail: Option<String> = row.get(5)?;
        let execution_id: String = row.get(6)?;

        let feature_type = feature_type_str
            .parse()
            .map_err(|e: String| decode_error(1, e))?;
        let status = status_str.parse().map_err(|e: String| decode_error(2, e))?;
        let last_updated = DateTime::parse_from_rfc3339(&last_updated_str)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| decode_error(4, e.to_string()))?;

        Ok(AssetRecord {
            asset_id,
            feature_type,
            status,
            attempt,
            last_updated,
            error_detail,
            execution_id,
        })
    }

    fn get_with(
        conn: &Connection,
        asset_id: &str,
        feature_type: FeatureType,
    ) -> Result<Option<AssetRecord>, StatusError> {
        conn.query_row(
            &format!(
                "SELECT {} FROM asset_status WHERE asset_id = ? AND feature_type = ?",
                SELECT_COLUMNS
            ),
            params![asset_id, feature_type.as_str()],
            Self::row_to_record,
        )
        .optional()
        .map_err(map_query_error)
    }
}

fn decode_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn map_query_error(e: rusqlite::Error) -> StatusError {
    match e {
        rusqlite::Error::FromSqlConversionFailure(_, _, inner) => {
            StatusError::Corrupt(inner.to_string())
        }
        other => StatusError::Database(other.to_string()),
    }
}

impl StatusStore for SqliteStatusStore {
    fn get(
        &self,
        asset_id: &str,
        feature_type: FeatureType,
    ) -> Result<Option<AssetRecord>, StatusError> {
        let conn = self.conn.lock().unwrap();
        Self::get_with(&conn, asset_id, feature_type)
    }

    fn upsert(&self, update: &StatusUpdate) -> Result<UpsertResult, StatusError> {
        if update.asset_id.is_empty() {
            return Err(StatusError::InvalidInput("asset_id is empty".to_string()));
        }
        if update.execution_id.is_empty() {
            return Err(StatusError::InvalidInput(
                "execution_id is empty".to_string(),
            ));
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .map_err(|e| StatusError::Database(e.to_string()))?;

        let existing = Self::get_with(&tx, &update.asset_id, update.feature_type)?;

        let decision = merge(existing.as_ref(), update);
        let (outcome, record) = match (decision, existing) {
            (MergeDecision::Insert(record), _) => (UpsertOutcome::Inserted, record),
            (MergeDecision::Replace(record), _) => (UpsertOutcome::Updated, record),
            (MergeDecision::Unchanged, Some(current)) => (UpsertOutcome::Unchanged, current),
            (MergeDecision::Stale(reason), Some(current)) => {
                tracing::debug!(
                    asset_id = %update.asset_id,
                    feature_type = %update.feature_type,
                    status = %update.status,
                    execution_id = %update.execution_id,
                    "Discarding status write: {}",
                    reason
                );
                (UpsertOutcome::Stale, current)
            }
            (_, None) => {
                return Err(StatusError::Corrupt(
                    "merge kept a record that does not exist".to_string(),
                ))
            }
        };

        if outcome.is_write() {
            tx.execute(
                r#"
                INSERT INTO asset_status (asset_id, feature_type, status, attempt, last_updated, error_detail, execution_id)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (asset_id, feature_type) DO UPDATE SET
                    status = excluded.status,
                    attempt = excluded.attempt,
                    last_updated = excluded.last_updated,
                    error_detail = excluded.error_detail,
                    execution_id = excluded.execution_id
                "#,
                params![
                    record.asset_id,
                    record.feature_type.as_str(),
                    record.status.as_str(),
                    record.attempt,
                    record.last_updated.to_rfc3339(),
                    record.error_detail,
                    record.execution_id,
                ],
            )
            .map_err(|e| StatusError::Database(e.to_string()))?;
        }

        tx.commit()
            .map_err(|e| StatusError::Database(e.to_string()))?;
        drop(conn);

        if outcome.is_write() {
            // No subscribers is fine.
            let _ = self.changes.send(record.clone());
        }

        Ok(UpsertResult { outcome, record })
    }

    fn list_for_asset(&self, asset_id: &str) -> Result<Vec<AssetRecord>, StatusError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM asset_status WHERE asset_id = ? ORDER BY feature_type ASC",
                SELECT_COLUMNS
            ))
            .map_err(|e| StatusError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![asset_id], Self::row_to_record)
            .map_err(map_query_error)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(map_query_error)
    }

    fn list(&self, filter: &StatusFilter) -> Result<Vec<AssetRecord>, StatusError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM asset_status {} ORDER BY last_updated DESC, asset_id ASC LIMIT ? OFFSET ?",
            SELECT_COLUMNS, where_clause
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StatusError::Database(e.to_string()))?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_record)
            .map_err(map_query_error)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(map_query_error)
    }

    fn count(&self, filter: &StatusFilter) -> Result<i64, StatusError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM asset_status {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| StatusError::Database(e.to_string()))
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<AssetRecord> {
        self.changes.subscribe()
    }

    fn claim_trigger(
        &self,
        key: &TriggerKey<'_>,
        execution_id: &str,
    ) -> Result<TriggerClaim, StatusError> {
        let conn = self.conn.lock().unwrap();
        let event_time = key.event_time.to_rfc3339();

        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO trigger_claims (asset_id, feature_type, bucket, object_key, event_time, execution_id, claimed_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    key.asset_id,
                    key.feature_type.as_str(),
                    key.bucket,
                    key.object_key,
                    event_time,
                    execution_id,
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(|e| StatusError::Database(e.to_string()))?;

        if inserted == 1 {
            return Ok(TriggerClaim::Claimed);
        }

        let owner: String = conn
            .query_row(
                "SELECT execution_id FROM trigger_claims WHERE asset_id = ? AND feature_type = ? AND bucket = ? AND object_key = ? AND event_time = ?",
                params![
                    key.asset_id,
                    key.feature_type.as_str(),
                    key.bucket,
                    key.object_key,
                    event_time
                ],
                |row| row.get(0),
            )
            .map_err(|e| StatusError::Database(e.to_string()))?;

        Ok(TriggerClaim::AlreadyClaimed {
            execution_id: owner,
        })
    }

    fn release_trigger(
        &self,
        key: &TriggerKey<'_>,
        execution_id: &str,
    ) -> Result<(), StatusError> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "DELETE FROM trigger_claims WHERE asset_id = ? AND feature_type = ? AND bucket = ? AND object_key = ? AND event_time = ? AND execution_id = ?",
            params![
                key.asset_id,
                key.feature_type.as_str(),
                key.bucket,
                key.object_key,
                key.event_time.to_rfc3339(),
                execution_id
            ],
        )
        .map_err(|e| StatusError::Database(e.to_string()))?;

        Ok(())
    }
}
