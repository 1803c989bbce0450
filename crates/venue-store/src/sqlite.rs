//! SQLite-based store implementation

use chrono::{DateTime, Local, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};
use venue_api::{
    Blocker, Booking, ClientBalance, Machine, MachineAssignment, Minutes, PlatformCategory,
    Session,
};
use venue_util::{BookingId, ClientId, MachineId, SessionId, StaffId, TimeWindow};

use crate::{
    AuditEvent, BalanceChange, SessionSettlement, Store, StoreError, StoreResult,
};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(2000);

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// How long to wait on a database locked by another process
    pub fn set_busy_timeout(&self, timeout: Duration) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.busy_timeout(timeout)?;
        Ok(())
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS machines (
                id TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                label TEXT
            );

            -- Base record shared by events and maintenance windows
            CREATE TABLE IF NOT EXISTS bookings (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                start_ms INTEGER NOT NULL,
                end_ms INTEGER,
                created_by TEXT NOT NULL,
                details_json TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                CHECK (end_ms IS NULL OR end_ms > start_ms)
            );

            CREATE TABLE IF NOT EXISTS machine_assignments (
                booking_id TEXT NOT NULL REFERENCES bookings(id) ON DELETE CASCADE,
                machine_id TEXT NOT NULL REFERENCES machines(id),
                PRIMARY KEY (booking_id, machine_id)
            );

            CREATE TABLE IF NOT EXISTS client_balances (
                client_id TEXT PRIMARY KEY,
                general_minutes INTEGER NOT NULL DEFAULT 0 CHECK (general_minutes >= 0),
                console_minutes INTEGER NOT NULL DEFAULT 0 CHECK (console_minutes >= 0),
                specialized_minutes INTEGER NOT NULL DEFAULT 0 CHECK (specialized_minutes >= 0)
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL REFERENCES client_balances(client_id),
                machine_id TEXT NOT NULL REFERENCES machines(id),
                start_ms INTEGER NOT NULL,
                end_ms INTEGER,
                end_reason TEXT
            );

            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Indexes
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_open_per_client
                ON sessions(client_id) WHERE end_ms IS NULL;
            CREATE INDEX IF NOT EXISTS idx_sessions_machine ON sessions(machine_id);
            CREATE INDEX IF NOT EXISTS idx_assignments_machine ON machine_assignments(machine_id);
            CREATE INDEX IF NOT EXISTS idx_bookings_start ON bookings(start_ms);
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

// Row helpers

const BOOKING_COLUMNS: &str =
    "b.id, b.start_ms, b.end_ms, b.created_by, b.details_json, b.created_at_ms";

const SESSION_COLUMNS: &str = "id, client_id, machine_id, start_ms, end_ms, end_reason";

struct BookingRow {
    id: String,
    start_ms: i64,
    end_ms: Option<i64>,
    created_by: String,
    details_json: String,
    created_at_ms: i64,
}

fn booking_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BookingRow> {
    Ok(BookingRow {
        id: row.get(0)?,
        start_ms: row.get(1)?,
        end_ms: row.get(2)?,
        created_by: row.get(3)?,
        details_json: row.get(4)?,
        created_at_ms: row.get(5)?,
    })
}

struct SessionRow {
    id: String,
    client_id: String,
    machine_id: String,
    start_ms: i64,
    end_ms: Option<i64>,
    end_reason: Option<String>,
}

fn session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        client_id: row.get(1)?,
        machine_id: row.get(2)?,
        start_ms: row.get(3)?,
        end_ms: row.get(4)?,
        end_reason: row.get(5)?,
    })
}

impl SessionRow {
    fn into_session(self) -> StoreResult<Session> {
        Ok(Session {
            id: self
                .id
                .parse::<SessionId>()
                .map_err(|e| StoreError::Serialization(format!("session id: {}", e)))?,
            client_id: ClientId::new(self.client_id),
            machine_id: MachineId::new(self.machine_id),
            started_at: from_millis(self.start_ms)?,
            ended_at: self.end_ms.map(from_millis).transpose()?,
            end_reason: self.end_reason,
        })
    }
}

fn to_millis(dt: &DateTime<Local>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(ms: i64) -> StoreResult<DateTime<Local>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.with_timezone(&Local))
        .ok_or_else(|| StoreError::Serialization(format!("timestamp out of range: {}", ms)))
}

fn parse_booking_id(s: &str) -> StoreResult<BookingId> {
    s.parse::<BookingId>()
        .map_err(|e| StoreError::Serialization(format!("booking id: {}", e)))
}

fn balance_column(category: PlatformCategory) -> &'static str {
    match category {
        PlatformCategory::General => "general_minutes",
        PlatformCategory::Console => "console_minutes",
        PlatformCategory::Specialized => "specialized_minutes",
    }
}

fn machine_ids_for(conn: &Connection, booking_id: &str) -> StoreResult<Vec<MachineId>> {
    let mut stmt = conn.prepare(
        "SELECT machine_id FROM machine_assignments WHERE booking_id = ? ORDER BY machine_id",
    )?;
    let ids = stmt
        .query_map([booking_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids.into_iter().map(MachineId::new).collect())
}

fn hydrate_booking(conn: &Connection, row: BookingRow) -> StoreResult<Booking> {
    let machine_ids = machine_ids_for(conn, &row.id)?;
    Ok(Booking {
        id: parse_booking_id(&row.id)?,
        window: TimeWindow {
            start: from_millis(row.start_ms)?,
            end: row.end_ms.map(from_millis).transpose()?,
        },
        details: serde_json::from_str(&row.details_json)?,
        created_by: StaffId::new(row.created_by),
        created_at: from_millis(row.created_at_ms)?,
        machine_ids,
    })
}

fn load_bookings<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> StoreResult<Vec<Booking>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, booking_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter()
        .map(|row| hydrate_booking(conn, row))
        .collect()
}

fn load_sessions<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> StoreResult<Vec<Session>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, session_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(SessionRow::into_session).collect()
}

fn read_balance(conn: &Connection, client_id: &ClientId) -> StoreResult<Option<ClientBalance>> {
    let minutes = conn
        .query_row(
            "SELECT general_minutes, console_minutes, specialized_minutes
             FROM client_balances WHERE client_id = ?",
            [client_id.as_str()],
            |row| {
                Ok(Minutes {
                    general: row.get(0)?,
                    console: row.get(1)?,
                    specialized: row.get(2)?,
                })
            },
        )
        .optional()?;

    Ok(minutes.map(|minutes| ClientBalance {
        client_id: client_id.clone(),
        minutes,
    }))
}

/// Earliest booking on `machine_id` overlapping `window`, other than `exclude`
fn first_booking_overlap(
    conn: &Connection,
    machine_id: &MachineId,
    window: &TimeWindow,
    exclude: Option<&BookingId>,
) -> StoreResult<Option<Booking>> {
    let sql = format!(
        r#"
        SELECT {} FROM bookings b
        JOIN machine_assignments a ON a.booking_id = b.id
        WHERE a.machine_id = ?1
          AND (?2 IS NULL OR b.id <> ?2)
          AND (?3 IS NULL OR b.start_ms < ?3)
          AND (b.end_ms IS NULL OR b.end_ms > ?4)
        ORDER BY b.start_ms, b.id
        LIMIT 1
        "#,
        BOOKING_COLUMNS
    );
    let mut bookings = load_bookings(
        conn,
        &sql,
        params![
            machine_id.as_str(),
            exclude.map(|id| id.to_string()),
            window.end.as_ref().map(to_millis),
            to_millis(&window.start),
        ],
    )?;
    Ok(bookings.pop())
}

/// Earliest open session on `machine_id` that has started before `window` ends
fn first_session_overlap(
    conn: &Connection,
    machine_id: &MachineId,
    window: &TimeWindow,
) -> StoreResult<Option<Session>> {
    let sql = format!(
        r#"
        SELECT {} FROM sessions
        WHERE machine_id = ?1
          AND end_ms IS NULL
          AND (?2 IS NULL OR start_ms < ?2)
        ORDER BY start_ms
        LIMIT 1
        "#,
        SESSION_COLUMNS
    );
    let mut sessions = load_sessions(
        conn,
        &sql,
        params![machine_id.as_str(), window.end.as_ref().map(to_millis)],
    )?;
    Ok(sessions.pop())
}

/// Whatever occupies part of `window` on `machine_id`, bookings first
fn first_overlap(
    conn: &Connection,
    machine_id: &MachineId,
    window: &TimeWindow,
    exclude: Option<&BookingId>,
) -> StoreResult<Option<Blocker>> {
    if let Some(booking) = first_booking_overlap(conn, machine_id, window, exclude)? {
        return Ok(Some(Blocker::Booking {
            booking_id: booking.id,
            kind: booking.kind(),
        }));
    }

    Ok(first_session_overlap(conn, machine_id, window)?.map(|session| Blocker::Session {
        session_id: session.id,
        client_id: session.client_id,
    }))
}

fn verify_no_overlap(
    conn: &Connection,
    machine_ids: &[MachineId],
    window: &TimeWindow,
    exclude: Option<&BookingId>,
) -> StoreResult<()> {
    for machine_id in machine_ids {
        if let Some(blocker) = first_overlap(conn, machine_id, window, exclude)? {
            return Err(StoreError::Overlap {
                machine_id: machine_id.clone(),
                blocker,
            });
        }
    }
    Ok(())
}

/// One millisecond starting at `instant`, the store's time resolution
fn instant_window(instant: &DateTime<Local>) -> TimeWindow {
    TimeWindow {
        start: *instant,
        end: Some(*instant + chrono::Duration::milliseconds(1)),
    }
}

fn insert_assignments(conn: &Connection, booking: &Booking) -> StoreResult<()> {
    let mut stmt =
        conn.prepare("INSERT INTO machine_assignments (booking_id, machine_id) VALUES (?, ?)")?;
    let booking_id = booking.id.to_string();
    for machine_id in &booking.machine_ids {
        stmt.execute(params![booking_id, machine_id.as_str()])?;
    }
    Ok(())
}

impl Store for SqliteStore {
    fn upsert_machine(&self, machine: &Machine) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT INTO machines (id, category, label)
            VALUES (?, ?, ?)
            ON CONFLICT(id)
            DO UPDATE SET category = excluded.category, label = excluded.label
            "#,
            params![
                machine.id.as_str(),
                machine.category.as_str(),
                machine.label.as_deref()
            ],
        )?;

        debug!(machine_id = %machine.id, category = %machine.category, "Machine upserted");
        Ok(())
    }

    fn get_machine(&self, id: &MachineId) -> StoreResult<Option<Machine>> {
        let conn = self.conn.lock().unwrap();

        let row: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT category, label FROM machines WHERE id = ?",
                [id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(category, label)| {
            Ok(Machine {
                id: id.clone(),
                category: category
                    .parse()
                    .map_err(|e: venue_api::ParseEnumError| StoreError::Serialization(e.to_string()))?,
                label,
            })
        })
        .transpose()
    }

    fn list_machines(&self) -> StoreResult<Vec<Machine>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare("SELECT id, category, label FROM machines ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, category, label)| {
                Ok(Machine {
                    id: MachineId::new(id),
                    category: category
                        .parse()
                        .map_err(|e: venue_api::ParseEnumError| {
                            StoreError::Serialization(e.to_string())
                        })?,
                    label,
                })
            })
            .collect()
    }

    fn insert_booking(&self, booking: &Booking) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        verify_no_overlap(&tx, &booking.machine_ids, &booking.window, None)?;

        tx.execute(
            r#"
            INSERT INTO bookings (id, kind, start_ms, end_ms, created_by, details_json, created_at_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                booking.id.to_string(),
                booking.kind().as_str(),
                to_millis(&booking.window.start),
                booking.window.end.as_ref().map(to_millis),
                booking.created_by.as_str(),
                serde_json::to_string(&booking.details)?,
                to_millis(&booking.created_at),
            ],
        )?;
        insert_assignments(&tx, booking)?;

        tx.commit()?;

        debug!(
            booking_id = %booking.id,
            machine_count = booking.machine_ids.len(),
            "Booking inserted"
        );
        Ok(())
    }

    fn replace_booking(&self, previous: &Booking, booking: &Booking) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let booking_id = booking.id.to_string();

        let sql = format!("SELECT {} FROM bookings b WHERE b.id = ?", BOOKING_COLUMNS);
        let stored = load_bookings(&tx, &sql, [&booking_id])?
            .pop()
            .ok_or_else(|| StoreError::NotFound(format!("booking {}", booking.id)))?;
        if stored.window != previous.window
            || stored.details != previous.details
            || stored.machine_ids != previous.machine_ids
        {
            return Err(StoreError::Stale(format!("booking {}", booking.id)));
        }

        verify_no_overlap(&tx, &booking.machine_ids, &booking.window, Some(&booking.id))?;

        tx.execute(
            r#"
            UPDATE bookings
            SET kind = ?, start_ms = ?, end_ms = ?, details_json = ?
            WHERE id = ?
            "#,
            params![
                booking.kind().as_str(),
                to_millis(&booking.window.start),
                booking.window.end.as_ref().map(to_millis),
                serde_json::to_string(&booking.details)?,
                booking_id,
            ],
        )?;
        tx.execute(
            "DELETE FROM machine_assignments WHERE booking_id = ?",
            [&booking_id],
        )?;
        insert_assignments(&tx, booking)?;

        tx.commit()?;

        debug!(booking_id = %booking.id, "Booking replaced");
        Ok(())
    }

    fn delete_booking(&self, id: &BookingId) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let booking_id = id.to_string();

        tx.execute(
            "DELETE FROM machine_assignments WHERE booking_id = ?",
            [&booking_id],
        )?;
        let deleted = tx.execute("DELETE FROM bookings WHERE id = ?", [&booking_id])?;
        if deleted == 0 {
            return Err(StoreError::NotFound(format!("booking {}", id)));
        }

        tx.commit()?;

        debug!(booking_id = %id, "Booking deleted");
        Ok(())
    }

    fn get_booking(&self, id: &BookingId) -> StoreResult<Option<Booking>> {
        let conn = self.conn.lock().unwrap();

        let sql = format!("SELECT {} FROM bookings b WHERE b.id = ?", BOOKING_COLUMNS);
        let mut bookings = load_bookings(&conn, &sql, [id.to_string()])?;
        Ok(bookings.pop())
    }

    fn bookings_for_machine(&self, machine_id: &MachineId) -> StoreResult<Vec<Booking>> {
        let conn = self.conn.lock().unwrap();

        let sql = format!(
            r#"
            SELECT {} FROM bookings b
            JOIN machine_assignments a ON a.booking_id = b.id
            WHERE a.machine_id = ?
            ORDER BY b.start_ms, b.id
            "#,
            BOOKING_COLUMNS
        );
        load_bookings(&conn, &sql, [machine_id.as_str()])
    }

    fn first_overlapping_booking(
        &self,
        machine_id: &MachineId,
        window: &TimeWindow,
        exclude: Option<&BookingId>,
    ) -> StoreResult<Option<Booking>> {
        let conn = self.conn.lock().unwrap();
        first_booking_overlap(&conn, machine_id, window, exclude)
    }

    fn bookings_in_window(&self, window: &TimeWindow) -> StoreResult<Vec<Booking>> {
        let conn = self.conn.lock().unwrap();

        let sql = format!(
            r#"
            SELECT {} FROM bookings b
            WHERE (?1 IS NULL OR b.start_ms < ?1)
              AND (b.end_ms IS NULL OR b.end_ms > ?2)
            ORDER BY b.start_ms, b.id
            "#,
            BOOKING_COLUMNS
        );
        load_bookings(
            &conn,
            &sql,
            params![window.end.as_ref().map(to_millis), to_millis(&window.start)],
        )
    }

    fn assignments_for_booking(&self, id: &BookingId) -> StoreResult<Vec<MachineAssignment>> {
        let conn = self.conn.lock().unwrap();

        let machine_ids = machine_ids_for(&conn, &id.to_string())?;
        Ok(machine_ids
            .into_iter()
            .map(|machine_id| MachineAssignment {
                booking_id: *id,
                machine_id,
            })
            .collect())
    }

    fn insert_session(&self, session: &Session) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if session.is_open() {
            verify_no_overlap(
                &tx,
                std::slice::from_ref(&session.machine_id),
                &instant_window(&session.started_at),
                None,
            )?;
        }

        tx.execute(
            r#"
            INSERT INTO sessions (id, client_id, machine_id, start_ms, end_ms, end_reason)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                session.id.to_string(),
                session.client_id.as_str(),
                session.machine_id.as_str(),
                to_millis(&session.started_at),
                session.ended_at.as_ref().map(to_millis),
                session.end_reason.as_deref(),
            ],
        )?;

        tx.commit()?;

        debug!(session_id = %session.id, client_id = %session.client_id, "Session inserted");
        Ok(())
    }

    fn get_session(&self, id: &SessionId) -> StoreResult<Option<Session>> {
        let conn = self.conn.lock().unwrap();

        let sql = format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLUMNS);
        let mut sessions = load_sessions(&conn, &sql, [id.to_string()])?;
        Ok(sessions.pop())
    }

    fn open_session_for_client(&self, client_id: &ClientId) -> StoreResult<Option<Session>> {
        let conn = self.conn.lock().unwrap();

        let sql = format!(
            "SELECT {} FROM sessions WHERE client_id = ? AND end_ms IS NULL",
            SESSION_COLUMNS
        );
        let mut sessions = load_sessions(&conn, &sql, [client_id.as_str()])?;
        Ok(sessions.pop())
    }

    fn open_sessions_on_machine(&self, machine_id: &MachineId) -> StoreResult<Vec<Session>> {
        let conn = self.conn.lock().unwrap();

        let sql = format!(
            "SELECT {} FROM sessions WHERE machine_id = ? AND end_ms IS NULL ORDER BY start_ms",
            SESSION_COLUMNS
        );
        load_sessions(&conn, &sql, [machine_id.as_str()])
    }

    fn settle_session(&self, settlement: &SessionSettlement) -> StoreResult<BalanceChange> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let closed = tx.execute(
            "UPDATE sessions SET end_ms = ?, end_reason = ? WHERE id = ? AND end_ms IS NULL",
            params![
                to_millis(&settlement.ended_at),
                settlement.end_reason.as_deref(),
                settlement.session_id.to_string(),
            ],
        )?;
        if closed == 0 {
            return Err(StoreError::NotFound(format!(
                "open session {}",
                settlement.session_id
            )));
        }

        let column = balance_column(settlement.category);
        let before: i64 = tx
            .query_row(
                &format!("SELECT {} FROM client_balances WHERE client_id = ?", column),
                [settlement.client_id.as_str()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("client {}", settlement.client_id)))?;

        let after = (before - settlement.minutes.max(0)).max(0);
        tx.execute(
            &format!("UPDATE client_balances SET {} = ? WHERE client_id = ?", column),
            params![after, settlement.client_id.as_str()],
        )?;

        tx.commit()?;

        debug!(
            session_id = %settlement.session_id,
            category = %settlement.category,
            before,
            after,
            "Session settled"
        );
        Ok(BalanceChange { before, after })
    }

    fn ensure_client(&self, client_id: &ClientId) -> StoreResult<ClientBalance> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT OR IGNORE INTO client_balances (client_id) VALUES (?)",
            [client_id.as_str()],
        )?;
        read_balance(&conn, client_id)?
            .ok_or_else(|| StoreError::NotFound(format!("client {}", client_id)))
    }

    fn get_balance(&self, client_id: &ClientId) -> StoreResult<Option<ClientBalance>> {
        let conn = self.conn.lock().unwrap();
        read_balance(&conn, client_id)
    }

    fn credit_balance(
        &self,
        client_id: &ClientId,
        category: PlatformCategory,
        minutes: i64,
    ) -> StoreResult<ClientBalance> {
        let conn = self.conn.lock().unwrap();
        let column = balance_column(category);

        conn.execute(
            &format!(
                r#"
                INSERT INTO client_balances (client_id, {column})
                VALUES (?, ?)
                ON CONFLICT(client_id)
                DO UPDATE SET {column} = {column} + excluded.{column}
                "#
            ),
            params![client_id.as_str(), minutes],
        )?;

        debug!(client_id = %client_id, category = %category, minutes, "Balance credited");
        read_balance(&conn, client_id)?
            .ok_or_else(|| StoreError::NotFound(format!("client {}", client_id)))
    }

    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Local))
                .unwrap_or_else(|_| venue_util::now());
            let event: crate::AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuditEventType;
    use chrono::TimeZone;
    use venue_api::{BookingDetails, BookingKind, EventStatus, MaintenancePriority};

    fn at(hour: u32, minute: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 12, 26, hour, minute, 0).unwrap()
    }

    fn store_with_machines() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store
            .upsert_machine(&Machine::new("pc-01", PlatformCategory::General))
            .unwrap();
        store
            .upsert_machine(&Machine::new("pc-02", PlatformCategory::General))
            .unwrap();
        store
            .upsert_machine(&Machine::new("ps5-01", PlatformCategory::Console))
            .unwrap();
        store
    }

    fn event(window: TimeWindow, machines: &[&str]) -> Booking {
        Booking {
            id: BookingId::new(),
            window,
            details: BookingDetails::Event {
                name: "Tournament".into(),
                status: EventStatus::Confirmed,
                customer: None,
            },
            created_by: StaffId::new("staff-1"),
            created_at: at(8, 0),
            machine_ids: machines.iter().map(|m| MachineId::new(*m)).collect(),
        }
    }

    fn session(client: &str, machine: &str, start: DateTime<Local>) -> Session {
        Session {
            id: SessionId::new(),
            client_id: ClientId::new(client),
            machine_id: MachineId::new(machine),
            started_at: start,
            ended_at: None,
            end_reason: None,
        }
    }

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_healthy());
    }

    #[test]
    fn test_machine_upsert() {
        let store = store_with_machines();
        assert_eq!(store.list_machines().unwrap().len(), 3);

        let mut relabeled = Machine::new("pc-01", PlatformCategory::Specialized);
        relabeled.label = Some("VR corner".into());
        store.upsert_machine(&relabeled).unwrap();

        let loaded = store.get_machine(&MachineId::new("pc-01")).unwrap().unwrap();
        assert_eq!(loaded.category, PlatformCategory::Specialized);
        assert_eq!(loaded.label.as_deref(), Some("VR corner"));
        assert!(store.get_machine(&MachineId::new("nope")).unwrap().is_none());
    }

    #[test]
    fn test_booking_roundtrip() {
        let store = store_with_machines();
        let booking = event(TimeWindow::closed(at(10, 0), at(12, 0)).unwrap(), &["pc-02", "pc-01"]);
        store.insert_booking(&booking).unwrap();

        let loaded = store.get_booking(&booking.id).unwrap().unwrap();
        assert_eq!(loaded.window, booking.window);
        assert_eq!(loaded.kind(), BookingKind::Event);
        // Assignments come back sorted
        assert_eq!(
            loaded.machine_ids,
            vec![MachineId::new("pc-01"), MachineId::new("pc-02")]
        );
    }

    #[test]
    fn test_open_ended_booking_roundtrip() {
        let store = store_with_machines();
        let mut booking = event(TimeWindow::open_ended(at(9, 0)), &["ps5-01"]);
        booking.details = BookingDetails::Maintenance {
            category: "repair".into(),
            priority: MaintenancePriority::Urgent,
        };
        store.insert_booking(&booking).unwrap();

        let loaded = store.get_booking(&booking.id).unwrap().unwrap();
        assert!(loaded.window.is_open_ended());
        assert_eq!(loaded.kind(), BookingKind::Maintenance);
    }

    #[test]
    fn test_insert_reverifies_overlap_and_writes_nothing() {
        let store = store_with_machines();
        let existing = event(TimeWindow::closed(at(10, 0), at(12, 0)).unwrap(), &["pc-02"]);
        store.insert_booking(&existing).unwrap();

        // pc-01 is free, pc-02 is not
        let request = event(TimeWindow::closed(at(11, 0), at(13, 0)).unwrap(), &["pc-01", "pc-02"]);
        let err = store.insert_booking(&request).unwrap_err();
        match err {
            StoreError::Overlap {
                machine_id,
                blocker,
            } => {
                assert_eq!(machine_id.as_str(), "pc-02");
                assert_eq!(
                    blocker,
                    Blocker::Booking {
                        booking_id: existing.id,
                        kind: BookingKind::Event
                    }
                );
            }
            other => panic!("expected overlap, got {:?}", other),
        }

        assert!(store.get_booking(&request.id).unwrap().is_none());
        assert!(store.assignments_for_booking(&request.id).unwrap().is_empty());
        assert!(store
            .bookings_for_machine(&MachineId::new("pc-01"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_touching_bookings_are_allowed() {
        let store = store_with_machines();
        store
            .insert_booking(&event(TimeWindow::closed(at(10, 0), at(12, 0)).unwrap(), &["pc-01"]))
            .unwrap();
        store
            .insert_booking(&event(TimeWindow::closed(at(12, 0), at(13, 0)).unwrap(), &["pc-01"]))
            .unwrap();
        store
            .insert_booking(&event(TimeWindow::closed(at(9, 0), at(10, 0)).unwrap(), &["pc-01"]))
            .unwrap();

        assert_eq!(
            store
                .bookings_for_machine(&MachineId::new("pc-01"))
                .unwrap()
                .len(),
            3
        );
    }

    #[test]
    fn test_bookings_in_window() {
        let store = store_with_machines();
        let morning = event(TimeWindow::closed(at(10, 0), at(12, 0)).unwrap(), &["pc-01"]);
        let open = event(TimeWindow::open_ended(at(18, 0)), &["pc-02"]);
        store.insert_booking(&morning).unwrap();
        store.insert_booking(&open).unwrap();

        let afternoon = TimeWindow::closed(at(12, 0), at(17, 0)).unwrap();
        assert!(store.bookings_in_window(&afternoon).unwrap().is_empty());

        // Open-ended booking catches anything later
        let late = TimeWindow::closed(at(22, 0), at(23, 0)).unwrap();
        let hits = store.bookings_in_window(&late).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, open.id);

        let day = TimeWindow::closed(at(0, 0), at(23, 59)).unwrap();
        let hits = store.bookings_in_window(&day).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, morning.id);
    }

    #[test]
    fn test_first_overlapping_booking() {
        let store = store_with_machines();
        let early = event(TimeWindow::closed(at(8, 0), at(9, 0)).unwrap(), &["pc-01"]);
        let late = event(TimeWindow::closed(at(10, 0), at(12, 0)).unwrap(), &["pc-01"]);
        store.insert_booking(&early).unwrap();
        store.insert_booking(&late).unwrap();

        let pc01 = MachineId::new("pc-01");
        let day = TimeWindow::closed(at(7, 0), at(23, 0)).unwrap();
        let hit = store.first_overlapping_booking(&pc01, &day, None).unwrap().unwrap();
        assert_eq!(hit.id, early.id);

        let hit = store
            .first_overlapping_booking(&pc01, &day, Some(&early.id))
            .unwrap()
            .unwrap();
        assert_eq!(hit.id, late.id);

        let gap = TimeWindow::closed(at(9, 0), at(10, 0)).unwrap();
        assert!(store.first_overlapping_booking(&pc01, &gap, None).unwrap().is_none());
    }

    #[test]
    fn test_replace_booking_replaces_assignments() {
        let store = store_with_machines();
        let previous = event(TimeWindow::closed(at(10, 0), at(12, 0)).unwrap(), &["pc-01", "pc-02"]);
        store.insert_booking(&previous).unwrap();
        let previous = store.get_booking(&previous.id).unwrap().unwrap();

        // Shifting over its own old window is not a conflict
        let mut booking = previous.clone();
        booking.window = TimeWindow::closed(at(11, 0), at(13, 0)).unwrap();
        booking.machine_ids = vec![MachineId::new("ps5-01")];
        store.replace_booking(&previous, &booking).unwrap();

        let assignments = store.assignments_for_booking(&booking.id).unwrap();
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].machine_id.as_str(), "ps5-01");

        let missing = event(TimeWindow::closed(at(10, 0), at(12, 0)).unwrap(), &["pc-01"]);
        assert!(matches!(
            store.replace_booking(&missing, &missing),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_replace_booking_refuses_outdated_copy() {
        let store = store_with_machines();
        let original = event(TimeWindow::closed(at(10, 0), at(12, 0)).unwrap(), &["pc-01"]);
        store.insert_booking(&original).unwrap();
        let original = store.get_booking(&original.id).unwrap().unwrap();

        let mut moved = original.clone();
        moved.window = TimeWindow::closed(at(14, 0), at(16, 0)).unwrap();
        store.replace_booking(&original, &moved).unwrap();

        // A writer still holding the first copy must not undo the move
        let mut renamed = original.clone();
        renamed.details = BookingDetails::Event {
            name: "Renamed".into(),
            status: EventStatus::Confirmed,
            customer: None,
        };
        assert!(matches!(
            store.replace_booking(&original, &renamed),
            Err(StoreError::Stale(_))
        ));

        let stored = store.get_booking(&original.id).unwrap().unwrap();
        assert_eq!(stored.window, moved.window);
        assert_eq!(stored.details, original.details);
    }

    #[test]
    fn test_delete_booking() {
        let store = store_with_machines();
        let booking = event(TimeWindow::closed(at(10, 0), at(12, 0)).unwrap(), &["pc-01"]);
        store.insert_booking(&booking).unwrap();

        store.delete_booking(&booking.id).unwrap();
        assert!(store.get_booking(&booking.id).unwrap().is_none());
        assert!(store.assignments_for_booking(&booking.id).unwrap().is_empty());

        assert!(matches!(
            store.delete_booking(&booking.id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_one_open_session_per_client() {
        let store = store_with_machines();
        let client = ClientId::new("alice");
        store.ensure_client(&client).unwrap();

        store.insert_session(&session("alice", "pc-01", at(10, 0))).unwrap();
        let second = store.insert_session(&session("alice", "pc-02", at(10, 5)));
        assert!(matches!(second, Err(StoreError::Constraint(_))));

        let open = store.open_session_for_client(&client).unwrap().unwrap();
        assert_eq!(open.machine_id.as_str(), "pc-01");
        assert_eq!(
            store
                .open_sessions_on_machine(&MachineId::new("pc-01"))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_session_needs_free_machine() {
        let store = store_with_machines();
        store.ensure_client(&ClientId::new("alice")).unwrap();
        store.ensure_client(&ClientId::new("bob")).unwrap();

        let first = session("alice", "pc-01", at(10, 0));
        store.insert_session(&first).unwrap();

        // Another client cannot sit at a machine that is in use
        let err = store
            .insert_session(&session("bob", "pc-01", at(10, 30)))
            .unwrap_err();
        match err {
            StoreError::Overlap { machine_id, blocker } => {
                assert_eq!(machine_id.as_str(), "pc-01");
                assert_eq!(
                    blocker,
                    Blocker::Session {
                        session_id: first.id,
                        client_id: ClientId::new("alice")
                    }
                );
            }
            other => panic!("expected overlap, got {:?}", other),
        }

        // Nor at one with a booking in progress
        let upkeep = event(TimeWindow::closed(at(9, 0), at(12, 0)).unwrap(), &["pc-02"]);
        store.insert_booking(&upkeep).unwrap();
        assert!(matches!(
            store.insert_session(&session("bob", "pc-02", at(11, 0))),
            Err(StoreError::Overlap { .. })
        ));
        store.insert_session(&session("bob", "pc-02", at(12, 0))).unwrap();
    }

    #[test]
    fn test_booking_over_session_from_other_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("venue.db");

        let store_a = SqliteStore::open(&path).unwrap();
        store_a
            .upsert_machine(&Machine::new("pc-01", PlatformCategory::General))
            .unwrap();
        store_a.ensure_client(&ClientId::new("alice")).unwrap();
        let store_b = SqliteStore::open(&path).unwrap();

        let open = session("alice", "pc-01", at(11, 0));
        store_a.insert_session(&open).unwrap();

        let booking = event(TimeWindow::closed(at(11, 30), at(12, 0)).unwrap(), &["pc-01"]);
        match store_b.insert_booking(&booking).unwrap_err() {
            StoreError::Overlap { blocker, .. } => assert!(matches!(
                blocker,
                Blocker::Session { session_id, .. } if session_id == open.id
            )),
            other => panic!("expected overlap, got {:?}", other),
        }
        assert!(store_a.get_booking(&booking.id).unwrap().is_none());

        // Windows ending before the session started are still free
        let earlier = event(TimeWindow::closed(at(9, 0), at(11, 0)).unwrap(), &["pc-01"]);
        store_b.insert_booking(&earlier).unwrap();
    }

    #[test]
    fn test_settle_session_floors_at_zero() {
        let store = store_with_machines();
        let client = ClientId::new("carol");
        store
            .credit_balance(&client, PlatformCategory::Console, 45)
            .unwrap();

        let s = session("carol", "ps5-01", at(10, 0));
        store.insert_session(&s).unwrap();

        let settlement = SessionSettlement {
            session_id: s.id,
            client_id: client.clone(),
            category: PlatformCategory::Console,
            ended_at: at(11, 0),
            end_reason: Some("logout".into()),
            minutes: 60,
        };
        let change = store.settle_session(&settlement).unwrap();
        assert_eq!(change, BalanceChange { before: 45, after: 0 });

        let closed = store.get_session(&s.id).unwrap().unwrap();
        assert_eq!(closed.ended_at, Some(at(11, 0)));
        assert_eq!(closed.end_reason.as_deref(), Some("logout"));

        // Second close finds no open session
        assert!(matches!(
            store.settle_session(&settlement),
            Err(StoreError::NotFound(_))
        ));
        let balance = store.get_balance(&client).unwrap().unwrap();
        assert_eq!(balance.minutes(PlatformCategory::Console), 0);
    }

    #[test]
    fn test_credit_balance() {
        let store = SqliteStore::in_memory().unwrap();
        let client = ClientId::new("dave");

        assert!(store.get_balance(&client).unwrap().is_none());

        store.credit_balance(&client, PlatformCategory::General, 30).unwrap();
        let balance = store
            .credit_balance(&client, PlatformCategory::General, 15)
            .unwrap();
        assert_eq!(balance.minutes(PlatformCategory::General), 45);
        assert_eq!(balance.minutes(PlatformCategory::Console), 0);

        // ensure_client keeps existing minutes
        let balance = store.ensure_client(&client).unwrap();
        assert_eq!(balance.minutes(PlatformCategory::General), 45);
    }

    #[test]
    fn test_audit_log() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .append_audit(AuditEvent::new(AuditEventType::BookingDeleted {
                booking_id: BookingId::new(),
            }))
            .unwrap();
        store
            .append_audit(AuditEvent::new(AuditEventType::MachinesLoaded { machine_count: 4 }))
            .unwrap();

        let events = store.get_recent_audits(10).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0].event,
            AuditEventType::MachinesLoaded { machine_count: 4 }
        ));
        assert!(matches!(
            events[1].event,
            AuditEventType::BookingDeleted { .. }
        ));
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("venue.db");

        let booking = event(TimeWindow::closed(at(10, 0), at(12, 0)).unwrap(), &["pc-01"]);
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .upsert_machine(&Machine::new("pc-01", PlatformCategory::General))
                .unwrap();
            store.insert_booking(&booking).unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert!(reopened.get_booking(&booking.id).unwrap().is_some());
    }
}
