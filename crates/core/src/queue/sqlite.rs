//! SQLite-backed work queue with a paired dead-letter table.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::metrics;

use super::{DeadLetter, QueueConfig, QueueError, QueueStats, ReceivedMessage, WorkQueue};

/// Outcome of a single non-blocking receive attempt.
#[derive(Debug)]
enum Receive {
    Message(ReceivedMessage),
    DeadLettered { message_id: String, receive_count: u32 },
    Empty,
}

/// Durable queue stored in SQLite.
///
/// Delivery, redelivery and dead-lettering all happen inside one transaction,
/// so a message is moved to the dead-letter table exactly once.
pub struct SqliteWorkQueue {
    conn: Mutex<Connection>,
    config: QueueConfig,
    audit: Option<AuditHandle>,
}

impl SqliteWorkQueue {
    pub fn new(path: &Path, config: QueueConfig) -> Result<Self, QueueError> {
        let conn = crate::db::open_shared(path).map_err(|e| QueueError::Database(e.to_string()))?;
        Self::from_connection(conn, config)
    }

    pub fn in_memory(config: QueueConfig) -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory().map_err(|e| QueueError::Database(e.to_string()))?;
        Self::from_connection(conn, config)
    }

    fn from_connection(conn: Connection, config: QueueConfig) -> Result<Self, QueueError> {
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            config,
            audit: None,
        })
    }

    /// Report dead-lettering and redrive to the audit trail.
    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn initialize_schema(conn: &Connection) -> Result<(), QueueError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS queue_messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                queue TEXT NOT NULL,
                body TEXT NOT NULL,
                receive_count INTEGER NOT NULL DEFAULT 0,
                visible_after_ms INTEGER NOT NULL,
                receipt_handle TEXT,
                sent_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_queue_messages_visible
                ON queue_messages(queue, visible_after_ms);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_messages_receipt
                ON queue_messages(receipt_handle);

            CREATE TABLE IF NOT EXISTS dead_letters (
                id TEXT PRIMARY KEY,
                queue TEXT NOT NULL,
                body TEXT NOT NULL,
                receive_count INTEGER NOT NULL,
                sent_at TEXT NOT NULL,
                dead_lettered_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_dead_letters_queue ON dead_letters(queue, dead_lettered_at);
            "#,
        )
        .map_err(|e| QueueError::Database(e.to_string()))
    }

    fn db_err(e: rusqlite::Error) -> QueueError {
        QueueError::Database(e.to_string())
    }

    /// Accept a message at an explicit time.
    pub fn enqueue_at(&self, body: &str, now: DateTime<Utc>) -> Result<String, QueueError> {
        let message_id = uuid::Uuid::new_v4().to_string();
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO queue_messages (id, queue, body, receive_count, visible_after_ms, receipt_handle, sent_at) VALUES (?, ?, ?, 0, ?, NULL, ?)",
            params![
                message_id,
                self.config.name,
                body,
                now.timestamp_millis(),
                now.to_rfc3339(),
            ],
        )
        .map_err(Self::db_err)?;

        metrics::QUEUE_ENQUEUED
            .with_label_values(&[&self.config.name])
            .inc();
        debug!(queue = %self.config.name, message_id = %message_id, "Message enqueued");

        Ok(message_id)
    }

    /// Single receive attempt at an explicit time. Dead-letters poison
    /// messages it encounters and keeps looking.
    pub fn receive_at(&self, now: DateTime<Utc>) -> Result<Option<ReceivedMessage>, QueueError> {
        loop {
            match self.try_receive(now)? {
                Receive::Message(message) => {
                    metrics::QUEUE_DELIVERED
                        .with_label_values(&[&self.config.name])
                        .inc();
                    return Ok(Some(message));
                }
                Receive::DeadLettered {
                    message_id,
                    receive_count,
                } => {
                    metrics::QUEUE_DEAD_LETTERED
                        .with_label_values(&[&self.config.name])
                        .inc();
                    warn!(
                        queue = %self.config.name,
                        message_id = %message_id,
                        receive_count,
                        "Message exceeded delivery limit, moved to dead-letter queue"
                    );
                    if let Some(ref audit) = self.audit {
                        audit.try_emit(AuditEvent::MessageDeadLettered {
                            queue: self.config.name.clone(),
                            message_id,
                            receive_count,
                        });
                    }
                }
                Receive::Empty => return Ok(None),
            }
        }
    }

    fn try_receive(&self, now: DateTime<Utc>) -> Result<Receive, QueueError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(Self::db_err)?;

        let candidate = tx
            .query_row(
                "SELECT id, body, receive_count, sent_at FROM queue_messages WHERE queue = ? AND visible_after_ms <= ? ORDER BY seq ASC LIMIT 1",
                params![self.config.name, now.timestamp_millis()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(Self::db_err)?;

        let Some((message_id, body, receive_count, sent_at_str)) = candidate else {
            return Ok(Receive::Empty);
        };

        let next_count = receive_count + 1;

        if next_count > self.config.max_receive_count {
            tx.execute(
                "INSERT INTO dead_letters (id, queue, body, receive_count, sent_at, dead_lettered_at) VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    message_id,
                    self.config.name,
                    body,
                    next_count,
                    sent_at_str,
                    now.to_rfc3339(),
                ],
            )
            .map_err(Self::db_err)?;
            tx.execute("DELETE FROM queue_messages WHERE id = ?", params![message_id])
                .map_err(Self::db_err)?;
            tx.commit().map_err(Self::db_err)?;

            return Ok(Receive::DeadLettered {
                message_id,
                receive_count: next_count,
            });
        }

        let visible_after = now
            + chrono::Duration::from_std(self.config.visibility_timeout())
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let receipt_handle = uuid::Uuid::new_v4().to_string();

        tx.execute(
            "UPDATE queue_messages SET receive_count = ?, visible_after_ms = ?, receipt_handle = ? WHERE id = ?",
            params![
                next_count,
                visible_after.timestamp_millis(),
                receipt_handle,
                message_id
            ],
        )
        .map_err(Self::db_err)?;
        tx.commit().map_err(Self::db_err)?;

        Ok(Receive::Message(ReceivedMessage {
            message_id,
            body,
            receive_count: next_count,
            receipt_handle,
            sent_at: parse_time(&sent_at_str)?,
            visible_after: millis_to_time(visible_after.timestamp_millis()),
        }))
    }

    fn stats_at(&self, now: DateTime<Utc>) -> Result<QueueStats, QueueError> {
        let conn = self.conn.lock().unwrap();
        let now_ms = now.timestamp_millis();

        let visible: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM queue_messages WHERE queue = ? AND visible_after_ms <= ?",
                params![self.config.name, now_ms],
                |row| row.get(0),
            )
            .map_err(Self::db_err)?;
        let in_flight: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM queue_messages WHERE queue = ? AND visible_after_ms > ?",
                params![self.config.name, now_ms],
                |row| row.get(0),
            )
            .map_err(Self::db_err)?;
        let dead_lettered: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM dead_letters WHERE queue = ?",
                params![self.config.name],
                |row| row.get(0),
            )
            .map_err(Self::db_err)?;

        Ok(QueueStats {
            visible,
            in_flight,
            dead_lettered,
        })
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, QueueError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| QueueError::Database(format!("Invalid timestamp: {}", e)))
}

fn millis_to_time(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

#[async_trait]
impl WorkQueue for SqliteWorkQueue {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn enqueue(&self, body: &str) -> Result<String, QueueError> {
        self.enqueue_at(body, Utc::now())
    }

    async fn dequeue(&self, max_wait: Duration) -> Result<Option<ReceivedMessage>, QueueError> {
        let max_wait = max_wait.min(self.config.max_wait());
        let deadline = tokio::time::Instant::now() + max_wait;

        loop {
            if let Some(message) = self.receive_at(Utc::now())? {
                return Ok(Some(message));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.config.poll_interval().min(deadline - now)).await;
        }
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let deleted = {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "DELETE FROM queue_messages WHERE queue = ? AND receipt_handle = ?",
                params![self.config.name, receipt_handle],
            )
            .map_err(Self::db_err)?
        };

        if deleted == 0 {
            return Err(QueueError::ReceiptNotFound(receipt_handle.to_string()));
        }

        metrics::QUEUE_ACKED
            .with_label_values(&[&self.config.name])
            .inc();
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        self.stats_at(Utc::now())
    }

    async fn dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>, QueueError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(
                "SELECT id, queue, body, receive_count, sent_at, dead_lettered_at FROM dead_letters WHERE queue = ? ORDER BY dead_lettered_at DESC LIMIT ?",
            )
            .map_err(Self::db_err)?;

        let rows = stmt
            .query_map(params![self.config.name, limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(Self::db_err)?;

        let mut letters = Vec::new();
        for row in rows {
            let (message_id, queue, body, receive_count, sent_at, dead_lettered_at) =
                row.map_err(Self::db_err)?;
            letters.push(DeadLetter {
                message_id,
                queue,
                body,
                receive_count,
                sent_at: parse_time(&sent_at)?,
                dead_lettered_at: parse_time(&dead_lettered_at)?,
            });
        }

        Ok(letters)
    }

    async fn redrive(&self, message_id: &str) -> Result<(), QueueError> {
        {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction().map_err(Self::db_err)?;

            let letter = tx
                .query_row(
                    "SELECT body, sent_at FROM dead_letters WHERE id = ? AND queue = ?",
                    params![message_id, self.config.name],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()
                .map_err(Self::db_err)?;

            let Some((body, sent_at)) = letter else {
                return Err(QueueError::DeadLetterNotFound(message_id.to_string()));
            };

            tx.execute(
                "INSERT INTO queue_messages (id, queue, body, receive_count, visible_after_ms, receipt_handle, sent_at) VALUES (?, ?, ?, 0, ?, NULL, ?)",
                params![
                    message_id,
                    self.config.name,
                    body,
                    Utc::now().timestamp_millis(),
                    sent_at,
                ],
            )
            .map_err(Self::db_err)?;
            tx.execute("DELETE FROM dead_letters WHERE id = ?", params![message_id])
                .map_err(Self::db_err)?;
            tx.commit().map_err(Self::db_err)?;
        }

        tracing::info!(queue = %self.config.name, message_id = %message_id, "Dead letter redriven");
        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::MessageRedriven {
                    queue: self.config.name.clone(),
                    message_id: message_id.to_string(),
                })
                .await;
        }

        Ok(())
    }
}
