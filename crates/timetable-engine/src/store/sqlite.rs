//! SQLite backend.
//!
//! Write transactions start with `BEGIN IMMEDIATE`, which takes SQLite's
//! writer lock up front: a second planner's transaction (in this or another
//! process) waits up to [`DEFAULT_BUSY_TIMEOUT_MS`] and then fails with the
//! retryable [`StoreError::Unavailable`](crate::error::StoreError::Unavailable).

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::warn;

use super::{PublishStore, ScheduleStore, StoreTransaction};
use crate::calendar::{DateRange, IsoWeek};
use crate::error::StoreResult;
use crate::model::{
    Actor, Audience, BlockId, ClassId, EntryId, NewEntry, NewSubstitution, RoomId,
    ScheduleTarget, SubjectId, SubstitutionEntry, SubstitutionId, SubstitutionKind, TeacherId,
    TimetableEntry,
};
use crate::publish::{PublishRecord, PublishStatus};

/// How long a connection waits for another writer before giving up.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS entries (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        class_id    TEXT    NOT NULL,
        teacher_id  TEXT    NOT NULL,
        subject_id  TEXT    NOT NULL,
        room_id     TEXT    NOT NULL,
        day_of_week INTEGER NOT NULL,
        period      INTEGER NOT NULL,
        block_id    TEXT,
        comment     TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_entries_day ON entries (day_of_week, period);
    CREATE INDEX IF NOT EXISTS idx_entries_class ON entries (class_id);
    CREATE INDEX IF NOT EXISTS idx_entries_teacher ON entries (teacher_id);

    CREATE TABLE IF NOT EXISTS substitutions (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        date           TEXT    NOT NULL,
        period         INTEGER NOT NULL,
        class_id       TEXT    NOT NULL,
        kind           TEXT    NOT NULL,
        new_teacher_id TEXT,
        new_subject_id TEXT,
        new_room_id    TEXT,
        comment        TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_substitutions_date ON substitutions (date, period);

    CREATE TABLE IF NOT EXISTS publish_status (
        year       INTEGER NOT NULL,
        week       INTEGER NOT NULL,
        audience   TEXT    NOT NULL,
        published  INTEGER NOT NULL,
        actor      TEXT    NOT NULL,
        changed_at TEXT    NOT NULL,
        PRIMARY KEY (year, week, audience)
    );
"#;

const ENTRY_COLUMNS: &str =
    "id, class_id, teacher_id, subject_id, room_id, day_of_week, period, block_id, comment";

const SUBSTITUTION_COLUMNS: &str =
    "id, date, period, class_id, kind, new_teacher_id, new_subject_id, new_room_id, comment";

pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) a database file.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(connection: Connection) -> StoreResult<Self> {
        connection.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
        connection.execute_batch(SCHEMA)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<TimetableEntry> {
    Ok(TimetableEntry {
        id: EntryId(row.get(0)?),
        class_id: ClassId(row.get(1)?),
        teacher_id: TeacherId(row.get(2)?),
        subject_id: SubjectId(row.get(3)?),
        room_id: RoomId(row.get(4)?),
        day_of_week: row.get(5)?,
        period: row.get(6)?,
        block_id: row.get::<_, Option<String>>(7)?.map(BlockId),
        comment: row.get(8)?,
    })
}

/// Raw substitution columns; the kind is validated separately so a single
/// defective row can be skipped instead of failing the whole query.
struct SubstitutionRow {
    id: i64,
    date: NaiveDate,
    period: u8,
    class_id: String,
    kind: String,
    new_teacher_id: Option<String>,
    new_subject_id: Option<String>,
    new_room_id: Option<String>,
    comment: Option<String>,
}

impl SubstitutionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            date: row.get(1)?,
            period: row.get(2)?,
            class_id: row.get(3)?,
            kind: row.get(4)?,
            new_teacher_id: row.get(5)?,
            new_subject_id: row.get(6)?,
            new_room_id: row.get(7)?,
            comment: row.get(8)?,
        })
    }

    fn into_entry(self) -> Option<SubstitutionEntry> {
        let kind = SubstitutionKind::from_parts(
            &self.kind,
            self.new_teacher_id.map(TeacherId),
            self.new_subject_id.map(SubjectId),
            self.new_room_id.map(RoomId),
        );
        match kind {
            Ok(kind) => Some(SubstitutionEntry {
                id: SubstitutionId(self.id),
                date: self.date,
                period: self.period,
                class_id: ClassId(self.class_id),
                kind,
                comment: self.comment,
            }),
            Err(e) => {
                warn!(substitution = self.id, error = %e, "skipping defective substitution row");
                None
            }
        }
    }
}

fn query_entries(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Vec<TimetableEntry>> {
    let sql = format!(
        "SELECT {} FROM entries {} ORDER BY day_of_week, period, id",
        ENTRY_COLUMNS, filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params, entry_from_row)?;
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

fn query_substitutions(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Vec<SubstitutionEntry>> {
    let sql = format!(
        "SELECT {} FROM substitutions s {} ORDER BY date, period, id",
        SUBSTITUTION_COLUMNS, filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params, SubstitutionRow::from_row)?;
    let mut substitutions = Vec::new();
    for row in rows {
        if let Some(sub) = row?.into_entry() {
            substitutions.push(sub);
        }
    }
    Ok(substitutions)
}

impl ScheduleStore for SqliteStore {
    fn entries_for(
        &self,
        target: &ScheduleTarget,
        _week: IsoWeek,
    ) -> StoreResult<Vec<TimetableEntry>> {
        let conn = self.connection.lock();
        match target {
            ScheduleTarget::Class(class) => {
                query_entries(&conn, "WHERE class_id = ?1", params![class.as_str()])
            }
            ScheduleTarget::Teacher(teacher) => {
                query_entries(&conn, "WHERE teacher_id = ?1", params![teacher.as_str()])
            }
        }
    }

    fn class_entries(&self, classes: &[ClassId]) -> StoreResult<Vec<TimetableEntry>> {
        let conn = self.connection.lock();
        let mut entries = Vec::new();
        for class in classes {
            entries.extend(query_entries(
                &conn,
                "WHERE class_id = ?1",
                params![class.as_str()],
            )?);
        }
        Ok(entries)
    }

    fn substitutions_for(
        &self,
        target: &ScheduleTarget,
        range: DateRange,
    ) -> StoreResult<Vec<SubstitutionEntry>> {
        let conn = self.connection.lock();
        match target {
            ScheduleTarget::Class(class) => query_substitutions(
                &conn,
                "WHERE s.date BETWEEN ?1 AND ?2 AND s.class_id = ?3",
                params![range.start, range.end, class.as_str()],
            ),
            // strftime('%w') numbers Monday..Friday 1..5, same as day_of_week.
            ScheduleTarget::Teacher(teacher) => query_substitutions(
                &conn,
                "WHERE s.date BETWEEN ?1 AND ?2 AND (s.new_teacher_id = ?3 OR EXISTS (
                    SELECT 1 FROM entries e
                    WHERE e.teacher_id = ?3
                      AND e.class_id = s.class_id
                      AND e.period = s.period
                      AND e.day_of_week = CAST(strftime('%w', s.date) AS INTEGER)))",
                params![range.start, range.end, teacher.as_str()],
            ),
        }
    }

    fn begin(&self) -> StoreResult<Box<dyn StoreTransaction + '_>> {
        let conn = self.connection.lock();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTransaction {
            conn,
            finished: false,
        }))
    }
}

impl PublishStore for SqliteStore {
    fn get_status(&self, week: IsoWeek) -> StoreResult<PublishStatus> {
        let mut status = PublishStatus::default();
        for audience in Audience::ALL {
            let published = self.record(week, audience)?.is_some_and(|r| r.published);
            match audience {
                Audience::Student => status.student = published,
                Audience::Teacher => status.teacher = published,
            }
        }
        Ok(status)
    }

    fn record(&self, week: IsoWeek, audience: Audience) -> StoreResult<Option<PublishRecord>> {
        let conn = self.connection.lock();
        read_record(&conn, week, audience)
    }

    fn set_status(&self, record: &PublishRecord) -> StoreResult<Option<PublishRecord>> {
        let mut conn = self.connection.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let previous = read_record(&tx, record.week, record.audience)?;
        if previous.as_ref().is_some_and(|r| r.published) != record.published {
            tx.execute(
                "INSERT INTO publish_status (year, week, audience, published, actor, changed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (year, week, audience) DO UPDATE SET
                    published = excluded.published,
                    actor = excluded.actor,
                    changed_at = excluded.changed_at",
                params![
                    record.week.year,
                    record.week.week,
                    record.audience.as_str(),
                    record.published,
                    record.actor.0,
                    record.changed_at,
                ],
            )?;
        }
        tx.commit()?;
        Ok(previous)
    }
}

fn read_record(
    conn: &Connection,
    week: IsoWeek,
    audience: Audience,
) -> StoreResult<Option<PublishRecord>> {
    let row = conn
        .query_row(
            "SELECT published, actor, changed_at FROM publish_status
             WHERE year = ?1 AND week = ?2 AND audience = ?3",
            params![week.year, week.week, audience.as_str()],
            |row| {
                Ok((
                    row.get::<_, bool>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, DateTime<Utc>>(2)?,
                ))
            },
        )
        .optional()?;
    Ok(row.map(|(published, actor, changed_at)| PublishRecord {
        week,
        audience,
        published,
        actor: Actor(actor),
        changed_at,
    }))
}

struct SqliteTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl StoreTransaction for SqliteTransaction<'_> {
    fn entry(&mut self, id: EntryId) -> StoreResult<Option<TimetableEntry>> {
        Ok(query_entries(&self.conn, "WHERE id = ?1", params![id.0])?
            .into_iter()
            .next())
    }

    fn block(&mut self, id: &BlockId) -> StoreResult<Vec<TimetableEntry>> {
        query_entries(&self.conn, "WHERE block_id = ?1", params![id.as_str()])
    }

    fn entries_on_day(&mut self, day_of_week: u8) -> StoreResult<Vec<TimetableEntry>> {
        query_entries(&self.conn, "WHERE day_of_week = ?1", params![day_of_week])
    }

    fn substitution(&mut self, id: SubstitutionId) -> StoreResult<Option<SubstitutionEntry>> {
        Ok(
            query_substitutions(&self.conn, "WHERE s.id = ?1", params![id.0])?
                .into_iter()
                .next(),
        )
    }

    fn substitutions_on(&mut self, date: NaiveDate) -> StoreResult<Vec<SubstitutionEntry>> {
        query_substitutions(&self.conn, "WHERE s.date = ?1", params![date])
    }

    fn substitutions_since(&mut self, from: NaiveDate) -> StoreResult<Vec<SubstitutionEntry>> {
        query_substitutions(&self.conn, "WHERE s.date >= ?1", params![from])
    }

    fn insert_entry(&mut self, entry: NewEntry) -> StoreResult<TimetableEntry> {
        self.conn.execute(
            "INSERT INTO entries
                (class_id, teacher_id, subject_id, room_id, day_of_week, period, block_id, comment)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.class_id.as_str(),
                entry.teacher_id.as_str(),
                entry.subject_id.as_str(),
                entry.room_id.as_str(),
                entry.day_of_week,
                entry.period,
                entry.block_id.as_ref().map(|b| b.as_str()),
                entry.comment.as_deref(),
            ],
        )?;
        let id = EntryId(self.conn.last_insert_rowid());
        Ok(entry.with_id(id))
    }

    fn delete_entry(&mut self, id: EntryId) -> StoreResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM entries WHERE id = ?1", params![id.0])?;
        Ok(deleted > 0)
    }

    fn insert_substitution(
        &mut self,
        substitution: NewSubstitution,
    ) -> StoreResult<SubstitutionEntry> {
        let kind = &substitution.kind;
        self.conn.execute(
            "INSERT INTO substitutions
                (date, period, class_id, kind, new_teacher_id, new_subject_id, new_room_id, comment)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                substitution.date,
                substitution.period,
                substitution.class_id.as_str(),
                kind.label(),
                kind.new_teacher().map(|t| t.as_str()),
                kind.new_subject().map(|s| s.as_str()),
                kind.new_room().map(|r| r.as_str()),
                substitution.comment.as_deref(),
            ],
        )?;
        let id = SubstitutionId(self.conn.last_insert_rowid());
        Ok(substitution.with_id(id))
    }

    fn delete_substitution(&mut self, id: SubstitutionId) -> StoreResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM substitutions WHERE id = ?1", params![id.0])?;
        Ok(deleted > 0)
    }

    fn commit(mut self: Box<Self>) -> StoreResult<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "rollback failed");
            }
        }
    }
}
