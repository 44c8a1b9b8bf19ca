use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::{EventFilter, EventStatus, NewWebhookEvent, StoredToken, WebhookEvent};

const MIGRATION_001: &str = include_str!("migrations/001_initial.sql");

const EVENT_COLUMNS: &str = "id, event_id, event_type, source, payload, headers, status, attempts,
     error_message, signature_verified, store_id, order_id, received_at, processed_at, updated_at";

const TOKEN_COLUMNS: &str =
    "id, access_token, refresh_token, token_type, scope, expires_at, is_active, created_at";

/// Database connection wrapper
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open database")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Database lock poisoned"))
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(MIGRATION_001)
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Cheap liveness probe
    pub fn ping(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .context("Database ping failed")
    }

    // ==================== Webhook Events ====================

    /// Append a delivery with status PENDING
    pub fn create_event(&self, new: &NewWebhookEvent) -> Result<WebhookEvent> {
        let now = Utc::now();
        let event = WebhookEvent {
            id: uuid::Uuid::new_v4().to_string(),
            event_id: new.event_id.clone(),
            event_type: new.event_type.clone(),
            source: new.source.clone(),
            payload: new.payload.clone(),
            headers: new.headers.clone(),
            status: EventStatus::Pending,
            attempts: 0,
            error_message: None,
            signature_verified: new.signature_verified,
            store_id: new.store_id.clone(),
            order_id: new.order_id.clone(),
            received_at: now,
            processed_at: None,
            updated_at: now,
        };

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO webhook_events (id, event_id, event_type, source, payload, headers, status,
                                        attempts, error_message, signature_verified, store_id,
                                        order_id, received_at, processed_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL, ?8, ?9, ?10, ?11, NULL, ?11)
            "#,
            params![
                event.id,
                event.event_id,
                event.event_type,
                event.source,
                event.payload,
                event.headers.to_string(),
                event.status.as_str(),
                event.signature_verified,
                event.store_id,
                event.order_id,
                now.timestamp_millis(),
            ],
        )
        .context("Failed to store webhook event")?;

        Ok(event)
    }

    /// Get an event by its internal id
    pub fn get_event(&self, id: &str) -> Result<Option<WebhookEvent>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM webhook_events WHERE id = ?1", EVENT_COLUMNS);
        conn.query_row(&sql, params![id], event_from_row)
            .optional()
            .context("Failed to get webhook event")
    }

    /// Resolve an internal id, or else the most recent delivery with that sender event id
    pub fn find_event(&self, key: &str) -> Result<Option<WebhookEvent>> {
        if let Some(event) = self.get_event(key)? {
            return Ok(Some(event));
        }

        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM webhook_events WHERE event_id = ?1
             ORDER BY received_at DESC, rowid DESC LIMIT 1",
            EVENT_COLUMNS
        );
        conn.query_row(&sql, params![key], event_from_row)
            .optional()
            .context("Failed to find webhook event")
    }

    /// List events matching all given filters, newest first
    pub fn list_events(&self, filter: &EventFilter) -> Result<Vec<WebhookEvent>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(event_type) = &filter.event_type {
            clauses.push("event_type = ?");
            params_vec.push(Box::new(event_type.clone()));
        }
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            params_vec.push(Box::new(status.as_str().to_string()));
        }
        if let Some(start) = filter.start {
            clauses.push("received_at >= ?");
            params_vec.push(Box::new(start.timestamp_millis()));
        }
        if let Some(end) = filter.end {
            clauses.push("received_at <= ?");
            params_vec.push(Box::new(end.timestamp_millis()));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let sql = format!(
            "SELECT {} FROM webhook_events {} ORDER BY received_at DESC, rowid DESC LIMIT ? OFFSET ?",
            EVENT_COLUMNS, where_sql
        );
        params_vec.push(Box::new(filter.limit));
        params_vec.push(Box::new(filter.offset));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        let events = stmt.query_map(params_refs.as_slice(), event_from_row)?;
        events
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list webhook events")
    }

    /// Move an event into PROCESSING and count the attempt.
    ///
    /// Only PENDING and FAILED events may transition; returns the new attempt
    /// count, or None if the event is already processing, processed, or absent.
    pub fn begin_processing(&self, id: &str) -> Result<Option<u32>> {
        let conn = self.conn()?;
        conn.query_row(
            "UPDATE webhook_events
             SET status = 'PROCESSING', attempts = attempts + 1, updated_at = ?1
             WHERE id = ?2 AND status IN ('PENDING', 'FAILED')
             RETURNING attempts",
            params![Utc::now().timestamp_millis(), id],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to claim webhook event")
    }

    /// PROCESSING -> PROCESSED, clearing any previous error
    pub fn mark_processed(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let now = Utc::now().timestamp_millis();
        let changed = conn.execute(
            "UPDATE webhook_events
             SET status = 'PROCESSED', processed_at = ?1, error_message = NULL, updated_at = ?1
             WHERE id = ?2 AND status = 'PROCESSING'",
            params![now, id],
        )?;
        Ok(changed == 1)
    }

    /// PROCESSING -> FAILED with the failure reason
    pub fn mark_failed(&self, id: &str, error: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE webhook_events
             SET status = 'FAILED', error_message = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'PROCESSING'",
            params![error, Utc::now().timestamp_millis(), id],
        )?;
        Ok(changed == 1)
    }

    /// Startup recovery after an unclean shutdown.
    ///
    /// Events left in PROCESSING are failed so they can be retried; the ids of
    /// events still PENDING are returned for re-dispatch.
    pub fn recover_interrupted(&self) -> Result<(usize, Vec<String>)> {
        let conn = self.conn()?;
        let reset = conn.execute(
            "UPDATE webhook_events
             SET status = 'FAILED', error_message = 'interrupted before completion', updated_at = ?1
             WHERE status = 'PROCESSING'",
            params![Utc::now().timestamp_millis()],
        )?;

        let mut stmt = conn.prepare(
            "SELECT id FROM webhook_events WHERE status = 'PENDING' ORDER BY received_at ASC, rowid ASC",
        )?;
        let pending = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to load pending webhook events")?;

        Ok((reset, pending))
    }

    // ==================== Handler Effects ====================

    /// Claim a side effect for `event_row_id`; false if it was already applied
    /// or another running attempt holds it.
    ///
    /// A claim that was never committed can be taken over once its owner is no
    /// longer PROCESSING (the owner crashed or was cancelled mid-effect).
    pub fn claim_effect(&self, effect_key: &str, event_row_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let now = Utc::now().timestamp_millis();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO handler_effects (effect_key, event_row_id, state, applied_at)
             VALUES (?1, ?2, 'claimed', ?3)",
            params![effect_key, event_row_id, now],
        )?;
        if inserted == 1 {
            return Ok(true);
        }

        let reclaimed = conn.execute(
            "UPDATE handler_effects
             SET event_row_id = ?2, applied_at = ?3
             WHERE effect_key = ?1 AND state = 'claimed'
               AND (event_row_id = ?2
                    OR event_row_id NOT IN (SELECT id FROM webhook_events WHERE status = 'PROCESSING'))",
            params![effect_key, event_row_id, now],
        )?;
        Ok(reclaimed == 1)
    }

    /// Mark a claimed side effect as applied; it is never released after this
    pub fn commit_effect(&self, effect_key: &str, event_row_id: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE handler_effects SET state = 'applied', applied_at = ?3
             WHERE effect_key = ?1 AND event_row_id = ?2",
            params![effect_key, event_row_id, Utc::now().timestamp_millis()],
        )?;
        if changed != 1 {
            anyhow::bail!("Effect claim {} is no longer held", effect_key);
        }
        Ok(())
    }

    /// Forget a claim whose side effect did not complete
    pub fn release_effect(&self, effect_key: &str, event_row_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM handler_effects
             WHERE effect_key = ?1 AND event_row_id = ?2 AND state = 'claimed'",
            params![effect_key, event_row_id],
        )?;
        Ok(())
    }

    // ==================== OAuth Tokens ====================

    pub fn save_token(&self, token: &StoredToken) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO auth_tokens (id, access_token, refresh_token, token_type, scope,
                                     expires_at, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                token.id,
                token.access_token,
                token.refresh_token,
                token.token_type,
                token.scope,
                token.expires_at.timestamp(),
                token.is_active,
                token.created_at.timestamp(),
            ],
        )
        .context("Failed to store token")?;
        Ok(())
    }

    /// Most recent active token that has not expired yet
    pub fn active_token(&self, now: DateTime<Utc>) -> Result<Option<StoredToken>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM auth_tokens WHERE is_active = 1 AND expires_at > ?1
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            TOKEN_COLUMNS
        );
        conn.query_row(&sql, params![now.timestamp()], token_from_row)
            .optional()
            .context("Failed to get active token")
    }

    /// Most recent refresh token from an active token, expired or not
    pub fn latest_refresh_token(&self) -> Result<Option<String>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT refresh_token FROM auth_tokens
             WHERE is_active = 1 AND refresh_token IS NOT NULL
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to get refresh token")
    }

    /// Mark a token revoked; matches either the access or the refresh token
    pub fn deactivate_token(&self, token: &str) -> Result<usize> {
        let conn = self.conn()?;
        let count = conn.execute(
            "UPDATE auth_tokens SET is_active = 0 WHERE access_token = ?1 OR refresh_token = ?1",
            params![token],
        )?;
        Ok(count)
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<WebhookEvent> {
    let headers: String = row.get(5)?;
    let status: String = row.get(6)?;
    let processed_at: Option<i64> = row.get(13)?;

    Ok(WebhookEvent {
        id: row.get(0)?,
        event_id: row.get(1)?,
        event_type: row.get(2)?,
        source: row.get(3)?,
        payload: row.get(4)?,
        headers: serde_json::from_str(&headers).unwrap_or_else(|_| serde_json::json!({})),
        status: EventStatus::parse(&status).unwrap_or_default(),
        attempts: row.get(7)?,
        error_message: row.get(8)?,
        signature_verified: row.get(9)?,
        store_id: row.get(10)?,
        order_id: row.get(11)?,
        received_at: millis_to_datetime(row.get(12)?),
        processed_at: processed_at.map(millis_to_datetime),
        updated_at: millis_to_datetime(row.get(14)?),
    })
}

fn token_from_row(row: &Row<'_>) -> rusqlite::Result<StoredToken> {
    Ok(StoredToken {
        id: row.get(0)?,
        access_token: row.get(1)?,
        refresh_token: row.get(2)?,
        token_type: row.get(3)?,
        scope: row.get(4)?,
        expires_at: DateTime::from_timestamp(row.get(5)?, 0).unwrap_or_else(Utc::now),
        is_active: row.get(6)?,
        created_at: DateTime::from_timestamp(row.get(7)?, 0).unwrap_or_else(Utc::now),
    })
}
