//! SQLite-backed workout store.
//!
//! One file holds every workout and pedal stroke. The capture process is the
//! only writer; dashboards and `spinlog sessions` open their own read
//! connections. WAL mode keeps readers from blocking the writer, and every
//! write runs in a single `BEGIN IMMEDIATE` transaction so a reader sees a
//! session either before or after a transition, never half of it.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::DatabaseError;
use crate::session::{PedalEvent, SessionStore, WorkoutSession};

use super::migrations;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite database for workout storage.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open (or create) the database at `path` and bring its schema up to date.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::QueryFailed(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "database opened");
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        self.conn.pragma_update(None, "foreign_keys", true)?;
        migrations::migrate(&self.conn)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))
    }

    /// Run `f` inside `BEGIN IMMEDIATE ... COMMIT`, rolling back on any error.
    fn write_tx<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&Connection) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        self.conn
            .execute_batch("BEGIN IMMEDIATE TRANSACTION;")
            .map_err(|e| DatabaseError::write(operation, e))?;
        match f(&self.conn) {
            Ok(value) => {
                self.conn
                    .execute_batch("COMMIT;")
                    .map_err(|e| DatabaseError::write(operation, e))?;
                Ok(value)
            }
            Err(err) => {
                let _ = self.conn.execute_batch("ROLLBACK;");
                Err(err)
            }
        }
    }

    // === Reads beyond the store port ===

    /// Number of pedal strokes recorded for a workout.
    pub fn event_count(&self, session_id: i64) -> Result<u64, DatabaseError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pedaling WHERE workout_id = ?1",
            [session_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn query_sessions<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<WorkoutSession>, DatabaseError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, user, begin, end)| {
                Ok::<_, DatabaseError>(WorkoutSession {
                    id,
                    user,
                    begin: parse_timestamp("begin_at", &begin)?,
                    end: end.map(|s| parse_timestamp("end_at", &s)).transpose()?,
                })
            })
            .collect()
    }

    fn query_events<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<PedalEvent>, DatabaseError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, workout_id, at)| {
                Ok::<_, DatabaseError>(PedalEvent {
                    id,
                    workout_id,
                    at: parse_timestamp("pedal_time", &at)?,
                })
            })
            .collect()
    }
}

/// Stored timestamps keep microseconds; anything finer is dropped on write.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &'static str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DatabaseError::InvalidTimestamp {
            column,
            value: value.to_string(),
        })
}

/// `None` if the workout does not exist, `Some(end_at)` otherwise.
fn workout_end(conn: &Connection, session_id: i64) -> rusqlite::Result<Option<Option<String>>> {
    conn.query_row(
        "SELECT end_at FROM workout WHERE id = ?1",
        [session_id],
        |row| row.get::<_, Option<String>>(0),
    )
    .optional()
}

fn require_open(
    conn: &Connection,
    operation: &'static str,
    session_id: i64,
) -> Result<(), DatabaseError> {
    match workout_end(conn, session_id).map_err(|e| DatabaseError::write(operation, e))? {
        None => Err(DatabaseError::UnknownSession(session_id)),
        Some(Some(_)) => Err(DatabaseError::SessionAlreadyClosed(session_id)),
        Some(None) => Ok(()),
    }
}

impl SessionStore for Database {
    fn open_session(&self, user: &str, begin: DateTime<Utc>) -> Result<i64, DatabaseError> {
        const OP: &str = "open_session";
        let begin = begin.trunc_subsecs(6);
        self.write_tx(OP, |conn| {
            let open: Option<i64> = conn
                .query_row(
                    "SELECT id FROM workout WHERE end_at IS NULL ORDER BY id LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| DatabaseError::write(OP, e))?;
            if let Some(id) = open {
                return Err(DatabaseError::SessionAlreadyOpen(id));
            }
            conn.execute(
                "INSERT INTO workout (user, begin_at) VALUES (?1, ?2)",
                params![user, format_timestamp(begin)],
            )
            .map_err(|e| DatabaseError::write(OP, e))?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn close_session(&self, session_id: i64, end: DateTime<Utc>) -> Result<(), DatabaseError> {
        const OP: &str = "close_session";
        let end = end.trunc_subsecs(6);
        self.write_tx(OP, |conn| {
            require_open(conn, OP, session_id)?;
            conn.execute(
                "UPDATE workout SET end_at = ?1 WHERE id = ?2",
                params![format_timestamp(end), session_id],
            )
            .map_err(|e| DatabaseError::write(OP, e))?;
            Ok(())
        })
    }

    fn append_event(&self, session_id: i64, at: DateTime<Utc>) -> Result<PedalEvent, DatabaseError> {
        const OP: &str = "append_event";
        let at = at.trunc_subsecs(6);
        self.write_tx(OP, |conn| {
            require_open(conn, OP, session_id)?;
            conn.execute(
                "INSERT INTO pedaling (workout_id, pedal_time) VALUES (?1, ?2)",
                params![session_id, format_timestamp(at)],
            )
            .map_err(|e| DatabaseError::write(OP, e))?;
            Ok(PedalEvent {
                id: conn.last_insert_rowid(),
                workout_id: session_id,
                at,
            })
        })
    }

    fn last_session(&self) -> Result<Option<WorkoutSession>, DatabaseError> {
        let mut found = self.query_sessions(
            "SELECT id, user, begin_at, end_at FROM workout ORDER BY id DESC LIMIT 1",
            [],
        )?;
        Ok(found.pop())
    }

    fn events_since(
        &self,
        session_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PedalEvent>, DatabaseError> {
        match since {
            Some(since) => self.query_events(
                "SELECT id, workout_id, pedal_time FROM pedaling
                 WHERE workout_id = ?1 AND pedal_time >= ?2
                 ORDER BY pedal_time, id",
                params![session_id, format_timestamp(since)],
            ),
            None => self.query_events(
                "SELECT id, workout_id, pedal_time FROM pedaling
                 WHERE workout_id = ?1
                 ORDER BY pedal_time, id",
                params![session_id],
            ),
        }
    }

    fn open_sessions(&self) -> Result<Vec<WorkoutSession>, DatabaseError> {
        self.query_sessions(
            "SELECT id, user, begin_at, end_at FROM workout WHERE end_at IS NULL ORDER BY id",
            [],
        )
    }

    fn sessions(&self) -> Result<Vec<WorkoutSession>, DatabaseError> {
        self.query_sessions("SELECT id, user, begin_at, end_at FROM workout ORDER BY id", [])
    }

    fn session(&self, session_id: i64) -> Result<Option<WorkoutSession>, DatabaseError> {
        let mut found = self.query_sessions(
            "SELECT id, user, begin_at, end_at FROM workout WHERE id = ?1",
            [session_id],
        )?;
        Ok(found.pop())
    }

    fn last_event(&self, session_id: i64) -> Result<Option<PedalEvent>, DatabaseError> {
        let mut found = self.query_events(
            "SELECT id, workout_id, pedal_time FROM pedaling
             WHERE workout_id = ?1
             ORDER BY pedal_time DESC, id DESC LIMIT 1",
            [session_id],
        )?;
        Ok(found.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap() + TimeDelta::milliseconds(ms)
    }

    #[test]
    fn open_append_close() {
        let db = Database::open_memory().unwrap();
        let id = db.open_session("default", t(0)).unwrap();
        let first = db.append_event(id, t(1_000)).unwrap();
        let second = db.append_event(id, t(1_850)).unwrap();
        assert!(second.id > first.id);
        db.close_session(id, t(5_000)).unwrap();

        let session = db.session(id).unwrap().unwrap();
        assert_eq!(session.user, "default");
        assert_eq!(session.begin, t(0));
        assert_eq!(session.end, Some(t(5_000)));
        assert_eq!(db.event_count(id).unwrap(), 2);
        assert_eq!(db.last_event(id).unwrap(), Some(second));
    }

    #[test]
    fn session_bounds_are_stored_at_micros() {
        let db = Database::open_memory().unwrap();
        let id = db
            .open_session("default", t(0) + TimeDelta::nanoseconds(1_999))
            .unwrap();
        db.close_session(id, t(10) + TimeDelta::nanoseconds(500))
            .unwrap();

        let session = db.session(id).unwrap().unwrap();
        assert_eq!(session.begin, t(0) + TimeDelta::microseconds(1));
        assert_eq!(session.end, Some(t(10)));
    }

    #[test]
    fn second_open_session_is_refused() {
        let db = Database::open_memory().unwrap();
        let id = db.open_session("default", t(0)).unwrap();
        let err = db.open_session("default", t(1)).unwrap_err();
        assert!(matches!(err, DatabaseError::SessionAlreadyOpen(open) if open == id));
        assert_eq!(db.sessions().unwrap().len(), 1);
    }

    #[test]
    fn close_rejects_unknown_and_closed() {
        let db = Database::open_memory().unwrap();
        assert!(matches!(
            db.close_session(42, t(0)),
            Err(DatabaseError::UnknownSession(42))
        ));
        let id = db.open_session("default", t(0)).unwrap();
        db.close_session(id, t(10)).unwrap();
        assert!(matches!(
            db.close_session(id, t(20)),
            Err(DatabaseError::SessionAlreadyClosed(_))
        ));
        assert!(matches!(
            db.append_event(id, t(30)),
            Err(DatabaseError::SessionAlreadyClosed(_))
        ));
        assert_eq!(db.session(id).unwrap().unwrap().end, Some(t(10)));
    }

    #[test]
    fn ids_are_not_reused() {
        let db = Database::open_memory().unwrap();
        let a = db.open_session("default", t(0)).unwrap();
        db.close_session(a, t(1)).unwrap();
        db.conn().execute("DELETE FROM workout WHERE id = ?1", [a]).unwrap();
        let b = db.open_session("default", t(2)).unwrap();
        assert!(b > a);
    }

    #[test]
    fn events_since_is_inclusive_and_ordered() {
        let db = Database::open_memory().unwrap();
        let id = db.open_session("default", t(0)).unwrap();
        // Inserted out of order on purpose.
        db.append_event(id, t(3_000)).unwrap();
        db.append_event(id, t(1_000)).unwrap();
        db.append_event(id, t(2_000)).unwrap();

        let all: Vec<_> = db
            .events_since(id, None)
            .unwrap()
            .into_iter()
            .map(|e| e.at)
            .collect();
        assert_eq!(all, [t(1_000), t(2_000), t(3_000)]);

        let tail = db.events_since(id, Some(t(2_000))).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].at, t(2_000));
        assert!(db.events_since(id + 1, None).unwrap().is_empty());
    }

    #[test]
    fn timestamps_sort_lexically() {
        // Sub-second precision must not break string ordering.
        assert!(format_timestamp(t(999)) < format_timestamp(t(1_000)));
        assert_eq!(format_timestamp(t(1_500)), "2024-06-01T09:00:01.500000Z");
        assert_eq!(parse_timestamp("x", &format_timestamp(t(1_500))).unwrap(), t(1_500));
        assert!(matches!(
            parse_timestamp("pedal_time", "yesterday"),
            Err(DatabaseError::InvalidTimestamp { column: "pedal_time", .. })
        ));
    }

    #[test]
    fn open_sessions_and_last_session() {
        let db = Database::open_memory().unwrap();
        assert!(db.last_session().unwrap().is_none());
        let a = db.open_session("a", t(0)).unwrap();
        assert_eq!(db.open_sessions().unwrap()[0].id, a);
        db.close_session(a, t(1)).unwrap();
        assert!(db.open_sessions().unwrap().is_empty());
        let b = db.open_session("b", t(2)).unwrap();
        assert_eq!(db.last_session().unwrap().unwrap().id, b);
    }

    #[test]
    fn file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("spinlog.db");
        let id = {
            let db = Database::open(&path).unwrap();
            let id = db.open_session("default", t(0)).unwrap();
            db.append_event(id, t(500)).unwrap();
            id
        };
        let db = Database::open(&path).unwrap();
        assert_eq!(db.open_sessions().unwrap()[0].id, id);
        assert_eq!(db.event_count(id).unwrap(), 1);
    }
}
