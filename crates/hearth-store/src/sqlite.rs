//! SQLite-based store implementation

use chrono::{DateTime, Local, TimeZone};
use hearth_api::{ApprovalStatus, GameSession, Platform, PurchaseApproval};
use hearth_util::{Amount, ApprovalId, ChildId, SessionId, UserId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{
    ApprovalTransition, AuditEvent, AuditEventType, LedgerEntry, Store, StoreError, StoreResult,
};

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

const SESSION_COLUMNS: &str = "id, child_id, platform, game_title, started_at, ended_at";

const APPROVAL_COLUMNS: &str = "id, child_id, platform, game_title, item_name, amount, currency, \
     status, requested_at, resolved_at, resolved_by, reason";

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        // Timestamps are unix milliseconds so range queries compare numerically
        conn.execute_batch(
            r#"
            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                event_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                child_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                game_title TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                ended_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS approvals (
                id TEXT PRIMARY KEY,
                child_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                game_title TEXT NOT NULL,
                item_name TEXT NOT NULL,
                amount INTEGER NOT NULL,
                currency TEXT NOT NULL,
                status TEXT NOT NULL,
                requested_at INTEGER NOT NULL,
                resolved_at INTEGER,
                resolved_by TEXT,
                reason TEXT
            );

            -- Auto-approved purchases
            CREATE TABLE IF NOT EXISTS purchases (
                id TEXT PRIMARY KEY,
                child_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                game_title TEXT NOT NULL,
                item_name TEXT NOT NULL,
                amount INTEGER NOT NULL,
                currency TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                approved_at INTEGER NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_sessions_child ON sessions(child_id, started_at);
            CREATE INDEX IF NOT EXISTS idx_approvals_child_status ON approvals(child_id, status);
            CREATE INDEX IF NOT EXISTS idx_approvals_status_requested ON approvals(status, requested_at);
            CREATE INDEX IF NOT EXISTS idx_purchases_child ON purchases(child_id, approved_at);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }

    fn query_sessions(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<Vec<GameSession>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, SessionRow::from_row)?;
        rows.map(|row| row?.into_session()).collect()
    }

    fn query_approvals(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<Vec<PurchaseApproval>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, ApprovalRow::from_row)?;
        rows.map(|row| row?.into_approval()).collect()
    }
}

fn millis(dt: &DateTime<Local>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(ms: i64) -> StoreResult<DateTime<Local>> {
    Local
        .timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", ms)))
}

fn parse_platform(s: &str) -> StoreResult<Platform> {
    s.parse::<Platform>().map_err(StoreError::Corrupt)
}

struct SessionRow {
    id: String,
    child_id: String,
    platform: String,
    game_title: String,
    started_at: i64,
    ended_at: Option<i64>,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            child_id: row.get(1)?,
            platform: row.get(2)?,
            game_title: row.get(3)?,
            started_at: row.get(4)?,
            ended_at: row.get(5)?,
        })
    }

    fn into_session(self) -> StoreResult<GameSession> {
        Ok(GameSession {
            id: SessionId::parse(&self.id)
                .ok_or_else(|| StoreError::Corrupt(format!("bad session id: {}", self.id)))?,
            child_id: ChildId::new(self.child_id),
            platform: parse_platform(&self.platform)?,
            game_title: self.game_title,
            started_at: from_millis(self.started_at)?,
            ended_at: self.ended_at.map(from_millis).transpose()?,
        })
    }
}

struct ApprovalRow {
    id: String,
    child_id: String,
    platform: String,
    game_title: String,
    item_name: String,
    amount: i64,
    currency: String,
    status: String,
    requested_at: i64,
    resolved_at: Option<i64>,
    resolved_by: Option<String>,
    reason: Option<String>,
}

impl ApprovalRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            child_id: row.get(1)?,
            platform: row.get(2)?,
            game_title: row.get(3)?,
            item_name: row.get(4)?,
            amount: row.get(5)?,
            currency: row.get(6)?,
            status: row.get(7)?,
            requested_at: row.get(8)?,
            resolved_at: row.get(9)?,
            resolved_by: row.get(10)?,
            reason: row.get(11)?,
        })
    }

    fn into_approval(self) -> StoreResult<PurchaseApproval> {
        Ok(PurchaseApproval {
            id: ApprovalId::parse(&self.id)
                .ok_or_else(|| StoreError::Corrupt(format!("bad approval id: {}", self.id)))?,
            child_id: ChildId::new(self.child_id),
            platform: parse_platform(&self.platform)?,
            game_title: self.game_title,
            item_name: self.item_name,
            amount: Amount::from_minor(self.amount),
            currency: self.currency,
            status: ApprovalStatus::parse(&self.status)
                .ok_or_else(|| StoreError::Corrupt(format!("bad status: {}", self.status)))?,
            requested_at: from_millis(self.requested_at)?,
            resolved_at: self.resolved_at.map(from_millis).transpose()?,
            resolved_by: self.resolved_by.map(UserId::new),
            reason: self.reason,
        })
    }
}

impl Store for SqliteStore {
    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![millis(&event.timestamp), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp: i64 = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp, event_json) = row?;
            let event: AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp: from_millis(timestamp)?,
                event,
            });
        }

        Ok(events)
    }

    fn insert_session(&self, session: &GameSession) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO sessions (id, child_id, platform, game_title, started_at, ended_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                session.id.to_string(),
                session.child_id.as_str(),
                session.platform.as_str(),
                session.game_title,
                millis(&session.started_at),
                session.ended_at.as_ref().map(millis),
            ],
        )?;

        debug!(session_id = %session.id, child_id = %session.child_id, "Session inserted");
        Ok(())
    }

    fn close_session(&self, id: &SessionId, ended_at: DateTime<Local>) -> StoreResult<bool> {
        let conn = self.conn()?;

        let changed = conn.execute(
            "UPDATE sessions SET ended_at = ? WHERE id = ? AND ended_at IS NULL",
            params![millis(&ended_at), id.to_string()],
        )?;

        Ok(changed == 1)
    }

    fn active_sessions(&self, child_id: &ChildId) -> StoreResult<Vec<GameSession>> {
        let conn = self.conn()?;
        Self::query_sessions(
            &conn,
            &format!(
                "SELECT {} FROM sessions WHERE child_id = ? AND ended_at IS NULL \
                 ORDER BY started_at",
                SESSION_COLUMNS
            ),
            [child_id.as_str()],
        )
    }

    fn active_session_on(
        &self,
        child_id: &ChildId,
        platform: Platform,
    ) -> StoreResult<Option<GameSession>> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM sessions \
                     WHERE child_id = ? AND platform = ? AND ended_at IS NULL \
                     ORDER BY started_at DESC LIMIT 1",
                    SESSION_COLUMNS
                ),
                params![child_id.as_str(), platform.as_str()],
                SessionRow::from_row,
            )
            .optional()?;

        row.map(SessionRow::into_session).transpose()
    }

    fn sessions_started_since(
        &self,
        child_id: &ChildId,
        since: DateTime<Local>,
    ) -> StoreResult<Vec<GameSession>> {
        let conn = self.conn()?;
        Self::query_sessions(
            &conn,
            &format!(
                "SELECT {} FROM sessions WHERE child_id = ? AND started_at >= ? \
                 ORDER BY started_at",
                SESSION_COLUMNS
            ),
            params![child_id.as_str(), millis(&since)],
        )
    }

    fn insert_approval(&self, approval: &PurchaseApproval) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute(
            &format!(
                "INSERT INTO approvals ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                APPROVAL_COLUMNS
            ),
            params![
                approval.id.to_string(),
                approval.child_id.as_str(),
                approval.platform.as_str(),
                approval.game_title,
                approval.item_name,
                approval.amount.minor(),
                approval.currency,
                approval.status.as_str(),
                millis(&approval.requested_at),
                approval.resolved_at.as_ref().map(millis),
                approval.resolved_by.as_ref().map(|u| u.as_str().to_string()),
                approval.reason,
            ],
        )?;

        debug!(approval_id = %approval.id, child_id = %approval.child_id, "Approval inserted");
        Ok(())
    }

    fn get_approval(&self, id: &ApprovalId) -> StoreResult<Option<PurchaseApproval>> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                &format!("SELECT {} FROM approvals WHERE id = ?", APPROVAL_COLUMNS),
                [id.to_string()],
                ApprovalRow::from_row,
            )
            .optional()?;

        row.map(ApprovalRow::into_approval).transpose()
    }

    fn transition_approval(
        &self,
        id: &ApprovalId,
        transition: &ApprovalTransition,
    ) -> StoreResult<bool> {
        let conn = self.conn()?;

        let changed = conn.execute(
            r#"
            UPDATE approvals
            SET status = ?, resolved_at = ?, resolved_by = ?, reason = ?
            WHERE id = ? AND status = 'pending'
            "#,
            params![
                transition.status.as_str(),
                millis(&transition.resolved_at),
                transition.resolved_by.as_ref().map(|u| u.as_str().to_string()),
                transition.reason,
                id.to_string(),
            ],
        )?;

        debug!(
            approval_id = %id,
            status = transition.status.as_str(),
            applied = changed == 1,
            "Approval transition"
        );
        Ok(changed == 1)
    }

    fn pending_approvals(&self, child_id: &ChildId) -> StoreResult<Vec<PurchaseApproval>> {
        let conn = self.conn()?;
        Self::query_approvals(
            &conn,
            &format!(
                "SELECT {} FROM approvals WHERE child_id = ? AND status = 'pending' \
                 ORDER BY requested_at, rowid",
                APPROVAL_COLUMNS
            ),
            [child_id.as_str()],
        )
    }

    fn pending_approvals_before(
        &self,
        cutoff: DateTime<Local>,
    ) -> StoreResult<Vec<PurchaseApproval>> {
        let conn = self.conn()?;
        Self::query_approvals(
            &conn,
            &format!(
                "SELECT {} FROM approvals WHERE status = 'pending' AND requested_at < ? \
                 ORDER BY requested_at, rowid",
                APPROVAL_COLUMNS
            ),
            [millis(&cutoff)],
        )
    }

    fn record_purchase(&self, entry: &LedgerEntry) -> StoreResult<()> {
        let conn = self.conn()?;
        let metadata_json = serde_json::to_string(&entry.metadata)?;

        conn.execute(
            r#"
            INSERT INTO purchases
                (id, child_id, platform, game_title, item_name, amount, currency,
                 metadata_json, approved_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                entry.id.to_string(),
                entry.child_id.as_str(),
                entry.platform.as_str(),
                entry.game_title,
                entry.item_name,
                entry.amount.minor(),
                entry.currency,
                metadata_json,
                millis(&entry.approved_at),
            ],
        )?;

        debug!(purchase_id = %entry.id, child_id = %entry.child_id, amount = %entry.amount, "Purchase recorded");
        Ok(())
    }

    fn approved_spend_between(
        &self,
        child_id: &ChildId,
        currency: &str,
        from: DateTime<Local>,
        to: DateTime<Local>,
    ) -> StoreResult<Amount> {
        let conn = self.conn()?;

        let total: i64 = conn.query_row(
            r#"
            SELECT
                (SELECT COALESCE(SUM(amount), 0) FROM purchases
                 WHERE child_id = ?1 AND currency = ?4
                   AND approved_at >= ?2 AND approved_at < ?3)
              + (SELECT COALESCE(SUM(amount), 0) FROM approvals
                 WHERE child_id = ?1 AND currency = ?4 AND status = 'approved'
                   AND resolved_at >= ?2 AND resolved_at < ?3)
            "#,
            params![child_id.as_str(), millis(&from), millis(&to), currency],
            |row| row.get(0),
        )?;

        Ok(Amount::from_minor(total))
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
