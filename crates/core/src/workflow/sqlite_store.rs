//! SQLite-backed execution store.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::store::{ExecutionStore, ExecutionStoreError, Lease};
use super::types::{ExecutionFilter, WorkflowExecution};

const SELECT_COLUMNS: &str = "execution_id, asset_id, feature_type, bucket, object_key, \
     event_time, source, state, attempt, result, message_id, error_detail, \
     started_at, updated_at, completed_at";

pub struct SqliteExecutionStore {
    conn: Mutex<Connection>,
}

impl SqliteExecutionStore {
    pub fn new(path: &Path) -> Result<Self, ExecutionStoreError> {
        let conn =
            crate::db::open_shared(path).map_err(|e| ExecutionStoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, ExecutionStoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ExecutionStoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ExecutionStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                execution_id TEXT PRIMARY KEY,
                asset_id TEXT NOT NULL,
                feature_type TEXT NOT NULL,
                bucket TEXT NOT NULL,
                object_key TEXT NOT NULL,
                event_time TEXT NOT NULL,
                source TEXT NOT NULL,
                state TEXT NOT NULL,
                attempt INTEGER NOT NULL DEFAULT 0,
                result TEXT,
                message_id TEXT,
                error_detail TEXT,
                started_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT,
                lease_owner TEXT,
                lease_until INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_executions_state ON executions(state);
            CREATE INDEX IF NOT EXISTS idx_executions_asset ON executions(asset_id);
            CREATE INDEX IF NOT EXISTS idx_executions_started ON executions(started_at);
            "#,
        )
        .map_err(|e| ExecutionStoreError::Database(e.to_string()))
    }

    fn build_where_clause(filter: &ExecutionFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(state) = filter.state {
            conditions.push("state = ?");
            params.push(Box::new(state.as_str()));
        }

        if let Some(ref asset_id) = filter.asset_id {
            conditions.push("asset_id = ?");
            params.push(Box::new(asset_id.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_execution(row: &rusqlite::Row) -> rusqlite::Result<WorkflowExecution> {
        let feature_type: String = row.get(2)?;
        let event_time: String = row.get(5)?;
        let source: String = row.get(6)?;
        let state: String = row.get(7)?;
        let result: Option<String> = row.get(9)?;
        let started_at: String = row.get(12)?;
        let updated_at: String = row.get(13)?;
        let completed_at: Option<String> = row.get(14)?;

        Ok(WorkflowExecution {
            execution_id: row.get(0)?,
            asset_id: row.get(1)?,
            feature_type: feature_type
                .parse()
                .map_err(|e: String| decode_error(2, e))?,
            bucket: row.get(3)?,
            object_key: row.get(4)?,
            event_time: parse_time(5, &event_time)?,
            source: source.parse().map_err(|e: String| decode_error(6, e))?,
            state: state.parse().map_err(|e: String| decode_error(7, e))?,
            attempt: row.get(8)?,
            result: result
                .map(|json| serde_json::from_str(&json))
                .transpose()
                .map_err(|e| decode_error(9, e.to_string()))?,
            message_id: row.get(10)?,
            error_detail: row.get(11)?,
            started_at: parse_time(12, &started_at)?,
            updated_at: parse_time(13, &updated_at)?,
            completed_at: completed_at
                .map(|s| parse_time(14, &s))
                .transpose()?,
        })
    }

    fn encode_result(
        execution: &WorkflowExecution,
    ) -> Result<Option<String>, ExecutionStoreError> {
        execution
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| ExecutionStoreError::Serialization(e.to_string()))
    }
}

fn parse_time(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| decode_error(column, e.to_string()))
}

fn decode_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn map_query_error(e: rusqlite::Error) -> ExecutionStoreError {
    match e {
        rusqlite::Error::FromSqlConversionFailure(_, _, inner) => {
            ExecutionStoreError::Serialization(inner.to_string())
        }
        other => ExecutionStoreError::Database(other.to_string()),
    }
}

impl ExecutionStore for SqliteExecutionStore {
    fn create(&self, execution: &WorkflowExecution) -> Result<(), ExecutionStoreError> {
        let result = Self::encode_result(execution)?;
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT INTO executions (
                execution_id, asset_id, feature_type, bucket, object_key,
                event_time, source, state, attempt, result, message_id, error_detail,
                started_at, updated_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                execution.execution_id,
                execution.asset_id,
                execution.feature_type.as_str(),
                execution.bucket,
                execution.object_key,
                execution.event_time.to_rfc3339(),
                execution.source.as_str(),
                execution.state.as_str(),
                execution.attempt,
                result,
                execution.message_id,
                execution.error_detail,
                execution.started_at.to_rfc3339(),
                execution.updated_at.to_rfc3339(),
                execution.completed_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                ExecutionStoreError::AlreadyExists(execution.execution_id.clone())
            }
            other => ExecutionStoreError::Database(other.to_string()),
        })?;

        Ok(())
    }

    fn get(&self, execution_id: &str) -> Result<Option<WorkflowExecution>, ExecutionStoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!(
                "SELECT {} FROM executions WHERE execution_id = ?",
                SELECT_COLUMNS
            ),
            params![execution_id],
            Self::row_to_execution,
        )
        .optional()
        .map_err(map_query_error)
    }

    fn acquire(
        &self,
        execution_id: &str,
        lease: &Lease,
    ) -> Result<Option<WorkflowExecution>, ExecutionStoreError> {
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();

        let taken = conn
            .execute(
                r#"
                UPDATE executions SET lease_owner = ?2, lease_until = ?3
                WHERE execution_id = ?1
                  AND state NOT IN ('COMPLETED', 'FAILED')
                  AND (lease_owner IS NULL OR lease_owner = ?2 OR lease_until < ?4)
                "#,
                params![
                    execution_id,
                    lease.owner,
                    lease.expires_at(now).timestamp_millis(),
                    now.timestamp_millis(),
                ],
            )
            .map_err(|e| ExecutionStoreError::Database(e.to_string()))?;

        if taken == 0 {
            return Ok(None);
        }

        conn.query_row(
            &format!(
                "SELECT {} FROM executions WHERE execution_id = ?",
                SELECT_COLUMNS
            ),
            params![execution_id],
            Self::row_to_execution,
        )
        .optional()
        .map_err(map_query_error)
    }

    fn save(
        &self,
        execution: &WorkflowExecution,
        lease: &Lease,
    ) -> Result<(), ExecutionStoreError> {
        let result = Self::encode_result(execution)?;
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                r#"
                UPDATE executions SET
                    state = ?2, attempt = ?3, result = ?4, message_id = ?5,
                    error_detail = ?6, updated_at = ?7, completed_at = ?8,
                    lease_until = ?10
                WHERE execution_id = ?1
                  AND lease_owner = ?9
                  AND state NOT IN ('COMPLETED', 'FAILED')
                "#,
                params![
                    execution.execution_id,
                    execution.state.as_str(),
                    execution.attempt,
                    result,
                    execution.message_id,
                    execution.error_detail,
                    execution.updated_at.to_rfc3339(),
                    execution.completed_at.map(|t| t.to_rfc3339()),
                    lease.owner,
                    lease.expires_at(now).timestamp_millis(),
                ],
            )
            .map_err(|e| ExecutionStoreError::Database(e.to_string()))?;

        if rows == 1 {
            return Ok(());
        }

        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM executions WHERE execution_id = ?)",
                params![execution.execution_id],
                |row| row.get(0),
            )
            .map_err(|e| ExecutionStoreError::Database(e.to_string()))?;

        if exists {
            Err(ExecutionStoreError::LostOwnership(
                execution.execution_id.clone(),
            ))
        } else {
            Err(ExecutionStoreError::NotFound(execution.execution_id.clone()))
        }
    }

    fn release(&self, execution_id: &str, lease: &Lease) -> Result<(), ExecutionStoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE executions SET lease_owner = NULL, lease_until = NULL \
             WHERE execution_id = ? AND lease_owner = ?",
            params![execution_id, lease.owner],
        )
        .map_err(|e| ExecutionStoreError::Database(e.to_string()))?;
        Ok(())
    }

    fn list(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<WorkflowExecution>, ExecutionStoreError> {
        let conn = self.conn.lock().unwrap();
        let (where_clause, mut params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM executions {} ORDER BY started_at DESC, rowid DESC LIMIT ? OFFSET ?",
            SELECT_COLUMNS, where_clause
        );
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| ExecutionStoreError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_execution)
            .map_err(|e| ExecutionStoreError::Database(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>().map_err(map_query_error)
    }

    fn count(&self, filter: &ExecutionFilter) -> Result<i64, ExecutionStoreError> {
        let conn = self.conn.lock().unwrap();
        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!("SELECT COUNT(*) FROM executions {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| ExecutionStoreError::Database(e.to_string()))
    }

    fn list_resumable(&self, limit: i64) -> Result<Vec<WorkflowExecution>, ExecutionStoreError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM executions WHERE state NOT IN ('COMPLETED', 'FAILED') \
             ORDER BY started_at ASC, rowid ASC LIMIT ?",
            SELECT_COLUMNS
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| ExecutionStoreError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![limit], Self::row_to_execution)
            .map_err(|e| ExecutionStoreError::Database(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>().map_err(map_query_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{ExecutionRequest, ExecutionState};

    fn execution(key: &str) -> WorkflowExecution {
        let request = ExecutionRequest::new("uploads", key, Utc::now()).unwrap();
        WorkflowExecution::from_request(&request)
    }

    #[test]
    fn test_create_and_get() {
        let store = SqliteExecutionStore::in_memory().unwrap();
        let exec = execution("img/42.png");
        store.create(&exec).unwrap();

        let loaded = store.get(&exec.execution_id).unwrap().unwrap();
        assert_eq!(loaded.asset_id, "42");
        assert_eq!(loaded.state, ExecutionState::Started);
        assert_eq!(loaded.object_key, "img/42.png");
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_create_twice_is_already_exists() {
        let store = SqliteExecutionStore::in_memory().unwrap();
        let exec = execution("img/42.png");
        store.create(&exec).unwrap();

        let err = store.create(&exec).unwrap_err();
        assert!(matches!(err, ExecutionStoreError::AlreadyExists(_)));
    }

    fn lease(owner: &str) -> Lease {
        Lease::new(owner, std::time::Duration::from_secs(60))
    }

    #[test]
    fn test_save_updates_state_and_attempt() {
        let store = SqliteExecutionStore::in_memory().unwrap();
        let exec = execution("img/42.png");
        store.create(&exec).unwrap();

        let engine = lease("engine-a");
        let mut exec = store.acquire(&exec.execution_id, &engine).unwrap().unwrap();
        exec.state = ExecutionState::Failed;
        exec.attempt = 3;
        exec.error_detail = Some("TransientStorageError".to_string());
        exec.completed_at = Some(Utc::now());
        store.save(&exec, &engine).unwrap();

        let loaded = store.get(&exec.execution_id).unwrap().unwrap();
        assert_eq!(loaded.state, ExecutionState::Failed);
        assert_eq!(loaded.attempt, 3);
        assert_eq!(loaded.error_detail.as_deref(), Some("TransientStorageError"));
        assert!(loaded.completed_at.is_some());
    }

    #[test]
    fn test_save_unknown_is_not_found() {
        let store = SqliteExecutionStore::in_memory().unwrap();
        let err = store
            .save(&execution("img/1.png"), &lease("engine-a"))
            .unwrap_err();
        assert!(matches!(err, ExecutionStoreError::NotFound(_)));
    }

    #[test]
    fn test_save_without_lease_is_rejected() {
        let store = SqliteExecutionStore::in_memory().unwrap();
        let mut exec = execution("img/1.png");
        store.create(&exec).unwrap();

        exec.state = ExecutionState::Extracting;
        let err = store.save(&exec, &lease("engine-a")).unwrap_err();
        assert!(matches!(err, ExecutionStoreError::LostOwnership(_)));
        assert_eq!(
            store.get(&exec.execution_id).unwrap().unwrap().state,
            ExecutionState::Started
        );
    }

    #[test]
    fn test_acquire_is_exclusive_until_released() {
        let store = SqliteExecutionStore::in_memory().unwrap();
        let exec = execution("img/1.png");
        store.create(&exec).unwrap();

        let a = lease("engine-a");
        let b = lease("engine-b");
        assert!(store.acquire(&exec.execution_id, &a).unwrap().is_some());
        assert!(store.acquire(&exec.execution_id, &b).unwrap().is_none());
        // Re-acquiring an own lease renews it.
        assert!(store.acquire(&exec.execution_id, &a).unwrap().is_some());

        store.release(&exec.execution_id, &a).unwrap();
        assert!(store.acquire(&exec.execution_id, &b).unwrap().is_some());

        let mut stale = exec.clone();
        stale.state = ExecutionState::Extracting;
        let err = store.save(&stale, &a).unwrap_err();
        assert!(matches!(err, ExecutionStoreError::LostOwnership(_)));
    }

    #[test]
    fn test_expired_lease_can_be_taken_over() {
        let store = SqliteExecutionStore::in_memory().unwrap();
        let exec = execution("img/1.png");
        store.create(&exec).unwrap();

        let crashed = Lease::new("engine-a", std::time::Duration::ZERO);
        assert!(store.acquire(&exec.execution_id, &crashed).unwrap().is_some());
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert!(store
            .acquire(&exec.execution_id, &lease("engine-b"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_terminal_execution_cannot_be_acquired_or_overwritten() {
        let store = SqliteExecutionStore::in_memory().unwrap();
        let exec = execution("img/1.png");
        store.create(&exec).unwrap();

        let a = lease("engine-a");
        let mut done = store.acquire(&exec.execution_id, &a).unwrap().unwrap();
        done.state = ExecutionState::Completed;
        done.message_id = Some("msg-1".to_string());
        store.save(&done, &a).unwrap();

        assert!(store.acquire(&exec.execution_id, &a).unwrap().is_none());

        let mut rewrite = done.clone();
        rewrite.message_id = Some("msg-2".to_string());
        let err = store.save(&rewrite, &a).unwrap_err();
        assert!(matches!(err, ExecutionStoreError::LostOwnership(_)));
        assert_eq!(
            store
                .get(&exec.execution_id)
                .unwrap()
                .unwrap()
                .message_id
                .as_deref(),
            Some("msg-1")
        );
    }

    #[test]
    fn test_list_resumable_skips_terminal() {
        let store = SqliteExecutionStore::in_memory().unwrap();
        let live = execution("img/1.png");
        let done = execution("img/2.png");
        store.create(&live).unwrap();
        store.create(&done).unwrap();

        let a = lease("engine-a");
        let mut done = store.acquire(&done.execution_id, &a).unwrap().unwrap();
        done.state = ExecutionState::Completed;
        store.save(&done, &a).unwrap();

        let resumable = store.list_resumable(10).unwrap();
        assert_eq!(resumable.len(), 1);
        assert_eq!(resumable[0].execution_id, live.execution_id);
    }

    #[test]
    fn test_list_filter_and_count() {
        let store = SqliteExecutionStore::in_memory().unwrap();
        for key in ["img/1.png", "img/1.png", "img/2.png"] {
            store.create(&execution(key)).unwrap();
        }

        let filter = ExecutionFilter::new().with_asset_id("1");
        assert_eq!(store.list(&filter).unwrap().len(), 2);
        assert_eq!(store.count(&filter).unwrap(), 2);
        assert_eq!(store.count(&ExecutionFilter::new()).unwrap(), 3);

        let counts = store.count_by_state().unwrap();
        assert!(counts.contains(&(ExecutionState::Started, 3)));
        assert!(counts.contains(&(ExecutionState::Failed, 0)));
    }
}
