//! The Point Store: the durable collection of point records for all users.
//!
//! A single SQLite table holds the [`AttendancePoint`] rows. Every mutating
//! operation in the engine runs inside one transaction obtained through
//! [`PointStore::with_tx`], so a mutation and its downstream cascade commit
//! or roll back together. The mutex around the connection serializes
//! concurrent mutations, which subsumes the per-user serialization the
//! cascade requires.
//!
//! The row-level helpers are free functions over `&Connection` so they work
//! both on the raw connection and inside transactions (`Transaction` derefs
//! to `Connection`).

use std::path::Path;
use std::sync::Mutex;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Value;
use rusqlite::{Connection, Row, Transaction, params};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

use crate::error::{EngineError, EngineResult};
use crate::models::{AttendancePoint, ExpirationType, PointType};

const DATE_FMT: &str = "%Y-%m-%d";
const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Handle to the point store.
pub struct PointStore {
    conn: Mutex<Connection>,
}

impl PointStore {
    /// Opens (or creates) the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory store. Used by tests and benchmarks.
    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs a read-only closure against the connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let guard = self.conn.lock().map_err(|_| poisoned("read"))?;
        f(&guard)
    }

    /// Runs a closure inside a transaction. The transaction commits when
    /// the closure succeeds and rolls back on any error, so a mutation and
    /// the cascade it triggers are atomic as a pair.
    pub fn with_tx<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&Transaction) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut guard = self.conn.lock().map_err(|_| poisoned(operation))?;
        let tx = guard.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

fn poisoned(operation: &str) -> EngineError {
    EngineError::Consistency {
        operation: operation.to_string(),
        message: "point store lock poisoned".to_string(),
    }
}

fn init_schema(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS attendance_points (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            attendance_id INTEGER,
            shift_date TEXT NOT NULL,
            point_type TEXT NOT NULL,
            points TEXT NOT NULL,
            is_manual INTEGER NOT NULL DEFAULT 0,
            is_advised INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            is_excused INTEGER NOT NULL DEFAULT 0,
            excused_by INTEGER,
            excused_at TEXT,
            excuse_reason TEXT,
            notes TEXT,
            is_expired INTEGER NOT NULL DEFAULT 0,
            expiration_type TEXT NOT NULL DEFAULT 'none',
            expires_at TEXT NOT NULL,
            eligible_for_gbro INTEGER NOT NULL,
            gbro_expires_at TEXT,
            tardy_minutes INTEGER,
            undertime_minutes INTEGER,
            violation_details TEXT NOT NULL,
            created_by INTEGER,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_points_user_date
            ON attendance_points (user_id, shift_date, id);
        CREATE INDEX IF NOT EXISTS idx_points_attendance
            ON attendance_points (attendance_id);",
    )?;
    Ok(())
}

/// A point record ready for insertion (identity not yet assigned).
#[derive(Debug, Clone)]
pub struct NewPoint {
    /// The disciplined employee.
    pub user_id: i64,
    /// Source attendance record; `None` for manual points.
    pub attendance_id: Option<i64>,
    /// The violation date.
    pub shift_date: NaiveDate,
    /// The violation category.
    pub point_type: PointType,
    /// The disciplinary weight.
    pub points: Decimal,
    /// True for administrator-entered points.
    pub is_manual: bool,
    /// Whether the employee gave prior notice.
    pub is_advised: bool,
    /// Denormalized source status.
    pub status: String,
    /// Fixed-duration expiration date.
    pub expires_at: NaiveDate,
    /// GBRO eligibility.
    pub eligible_for_gbro: bool,
    /// Initial behavior-based expiration date, when eligible.
    pub gbro_expires_at: Option<NaiveDate>,
    /// Which policy governs the lapse at creation.
    pub expiration_type: ExpirationType,
    /// Minutes late.
    pub tardy_minutes: Option<i64>,
    /// Minutes short.
    pub undertime_minutes: Option<i64>,
    /// Human-readable violation summary.
    pub violation_details: String,
    /// Free-form notes.
    pub notes: Option<String>,
    /// Administrator id for manual points.
    pub created_by: Option<i64>,
    /// Creation timestamp.
    pub created_at: NaiveDateTime,
}

/// Which rows a [`query_points`] call should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    /// Neither excused nor expired.
    Active,
    /// Excused, regardless of expiry.
    Excused,
    /// Expired, regardless of excuse state.
    Expired,
}

/// Filter criteria for range/status queries over the store.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PointFilter {
    /// Restrict to one user.
    pub user_id: Option<i64>,
    /// Restrict to one point type.
    pub point_type: Option<PointType>,
    /// Restrict by excuse/expiry state.
    pub status: Option<StatusFilter>,
    /// Earliest shift date, inclusive.
    pub date_from: Option<NaiveDate>,
    /// Latest shift date, inclusive.
    pub date_to: Option<NaiveDate>,
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<AttendancePoint> {
    let shift_date: String = row.get("shift_date")?;
    let shift_date = parse_date(&shift_date, 3)?;

    let expires_at: String = row.get("expires_at")?;
    let expires_at = parse_date(&expires_at, 17)?;

    let gbro_expires_at: Option<String> = row.get("gbro_expires_at")?;
    let gbro_expires_at = match gbro_expires_at {
        Some(s) => Some(parse_date(&s, 19)?),
        None => None,
    };

    let excused_at: Option<String> = row.get("excused_at")?;
    let excused_at = match excused_at {
        Some(s) => Some(parse_datetime(&s, 11)?),
        None => None,
    };

    let created_at: String = row.get("created_at")?;
    let created_at = parse_datetime(&created_at, 23)?;

    let point_type: String = row.get("point_type")?;
    let point_type = PointType::from_db_str(&point_type)
        .ok_or_else(|| conversion_error(4, format!("unknown point type: {point_type}")))?;

    let expiration_type: String = row.get("expiration_type")?;
    let expiration_type = ExpirationType::from_db_str(&expiration_type)
        .ok_or_else(|| conversion_error(15, format!("unknown expiration type: {expiration_type}")))?;

    let points: String = row.get("points")?;
    let points = Decimal::from_str(&points)
        .map_err(|e| conversion_error(5, format!("bad point weight: {e}")))?;

    Ok(AttendancePoint {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        attendance_id: row.get("attendance_id")?,
        shift_date,
        point_type,
        points,
        is_manual: row.get::<_, i64>("is_manual")? != 0,
        is_advised: row.get::<_, i64>("is_advised")? != 0,
        status: row.get("status")?,
        is_excused: row.get::<_, i64>("is_excused")? != 0,
        excused_by: row.get("excused_by")?,
        excused_at,
        excuse_reason: row.get("excuse_reason")?,
        notes: row.get("notes")?,
        is_expired: row.get::<_, i64>("is_expired")? != 0,
        expiration_type,
        expires_at,
        eligible_for_gbro: row.get::<_, i64>("eligible_for_gbro")? != 0,
        gbro_expires_at,
        tardy_minutes: row.get("tardy_minutes")?,
        undertime_minutes: row.get("undertime_minutes")?,
        violation_details: row.get("violation_details")?,
        created_by: row.get("created_by")?,
        created_at,
    })
}

fn parse_date(s: &str, idx: usize) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FMT)
        .map_err(|e| conversion_error(idx, format!("bad date '{s}': {e}")))
}

fn parse_datetime(s: &str, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DATETIME_FMT)
        .map_err(|e| conversion_error(idx, format!("bad timestamp '{s}': {e}")))
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn fmt_date(d: NaiveDate) -> String {
    d.format(DATE_FMT).to_string()
}

fn fmt_opt_date(d: Option<NaiveDate>) -> Option<String> {
    d.map(fmt_date)
}

/// Inserts a new point row and returns its id.
pub fn insert_point(conn: &Connection, point: &NewPoint) -> EngineResult<i64> {
    conn.execute(
        "INSERT INTO attendance_points (
            user_id, attendance_id, shift_date, point_type, points,
            is_manual, is_advised, status, is_expired, expiration_type,
            expires_at, eligible_for_gbro, gbro_expires_at,
            tardy_minutes, undertime_minutes, violation_details,
            notes, created_by, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            point.user_id,
            point.attendance_id,
            fmt_date(point.shift_date),
            point.point_type.as_str(),
            point.points.to_string(),
            point.is_manual as i64,
            point.is_advised as i64,
            point.status,
            point.expiration_type.as_str(),
            fmt_date(point.expires_at),
            point.eligible_for_gbro as i64,
            fmt_opt_date(point.gbro_expires_at),
            point.tardy_minutes,
            point.undertime_minutes,
            point.violation_details,
            point.notes,
            point.created_by,
            point.created_at.format(DATETIME_FMT).to_string(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Fetches a point by id, failing with `NotFound` when absent.
pub fn get_point(conn: &Connection, id: i64) -> EngineResult<AttendancePoint> {
    let mut stmt = conn.prepare("SELECT * FROM attendance_points WHERE id = ?1")?;
    stmt.query_row([id], map_row).map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => EngineError::NotFound {
            entity: "Point".to_string(),
            id,
        },
        other => other.into(),
    })
}

/// Finds the point derived from a given attendance record, if any.
///
/// When legacy duplicates exist for the attendance id, the lowest-id row
/// is returned (the one `remove_duplicates` would keep).
pub fn find_by_attendance(
    conn: &Connection,
    attendance_id: i64,
) -> EngineResult<Option<AttendancePoint>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM attendance_points WHERE attendance_id = ?1 ORDER BY id ASC LIMIT 1",
    )?;
    let mut rows = stmt.query_map([attendance_id], map_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

/// Returns every point of a user, ordered by shift date then id — the
/// materialized ordering the cascade depends on.
pub fn points_for_user(conn: &Connection, user_id: i64) -> EngineResult<Vec<AttendancePoint>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM attendance_points WHERE user_id = ?1 ORDER BY shift_date ASC, id ASC",
    )?;
    collect(stmt.query_map([user_id], map_row)?)
}

/// Range/status query over the store, for listings, statistics, and the
/// Export collaborator.
pub fn query_points(conn: &Connection, filter: &PointFilter) -> EngineResult<Vec<AttendancePoint>> {
    let mut sql = String::from("SELECT * FROM attendance_points WHERE 1=1");
    let mut values: Vec<Value> = Vec::new();

    if let Some(user_id) = filter.user_id {
        sql.push_str(" AND user_id = ?");
        values.push(Value::Integer(user_id));
    }
    if let Some(point_type) = filter.point_type {
        sql.push_str(" AND point_type = ?");
        values.push(Value::Text(point_type.as_str().to_string()));
    }
    match filter.status {
        Some(StatusFilter::Active) => sql.push_str(" AND is_excused = 0 AND is_expired = 0"),
        Some(StatusFilter::Excused) => sql.push_str(" AND is_excused = 1"),
        Some(StatusFilter::Expired) => sql.push_str(" AND is_expired = 1"),
        None => {}
    }
    if let Some(from) = filter.date_from {
        sql.push_str(" AND shift_date >= ?");
        values.push(Value::Text(fmt_date(from)));
    }
    if let Some(to) = filter.date_to {
        sql.push_str(" AND shift_date <= ?");
        values.push(Value::Text(fmt_date(to)));
    }
    sql.push_str(" ORDER BY shift_date ASC, id ASC");

    let mut stmt = conn.prepare(&sql)?;
    collect(stmt.query_map(rusqlite::params_from_iter(values), map_row)?)
}

/// Writes the mutable columns of a point back to the store.
pub fn update_point(conn: &Connection, point: &AttendancePoint) -> EngineResult<()> {
    let changed = conn.execute(
        "UPDATE attendance_points SET
            shift_date = ?2, point_type = ?3, points = ?4, is_advised = ?5,
            status = ?6, is_excused = ?7, excused_by = ?8, excused_at = ?9,
            excuse_reason = ?10, notes = ?11, is_expired = ?12,
            expiration_type = ?13, expires_at = ?14, gbro_expires_at = ?15,
            tardy_minutes = ?16, undertime_minutes = ?17, eligible_for_gbro = ?18
         WHERE id = ?1",
        params![
            point.id,
            fmt_date(point.shift_date),
            point.point_type.as_str(),
            point.points.to_string(),
            point.is_advised as i64,
            point.status,
            point.is_excused as i64,
            point.excused_by,
            point
                .excused_at
                .map(|t| t.format(DATETIME_FMT).to_string()),
            point.excuse_reason,
            point.notes,
            point.is_expired as i64,
            point.expiration_type.as_str(),
            fmt_date(point.expires_at),
            fmt_opt_date(point.gbro_expires_at),
            point.tardy_minutes,
            point.undertime_minutes,
            point.eligible_for_gbro as i64,
        ],
    )?;
    if changed == 0 {
        return Err(EngineError::NotFound {
            entity: "Point".to_string(),
            id: point.id,
        });
    }
    Ok(())
}

/// Writes the expiration state of one point. Only the Behavior-Expiration
/// Service calls this; no other component writes `gbro_expires_at`.
pub fn set_expiration_state(
    conn: &Connection,
    id: i64,
    gbro_expires_at: Option<NaiveDate>,
    expiration_type: ExpirationType,
    is_expired: bool,
) -> EngineResult<()> {
    let changed = conn.execute(
        "UPDATE attendance_points
         SET gbro_expires_at = ?2, expiration_type = ?3, is_expired = ?4
         WHERE id = ?1",
        params![
            id,
            fmt_opt_date(gbro_expires_at),
            expiration_type.as_str(),
            is_expired as i64,
        ],
    )?;
    if changed == 0 {
        return Err(EngineError::Consistency {
            operation: "set_expiration_state".to_string(),
            message: format!("point {id} vanished mid-cascade"),
        });
    }
    Ok(())
}

/// Hard-deletes a point row.
pub fn delete_point(conn: &Connection, id: i64) -> EngineResult<()> {
    let changed = conn.execute("DELETE FROM attendance_points WHERE id = ?1", [id])?;
    if changed == 0 {
        return Err(EngineError::NotFound {
            entity: "Point".to_string(),
            id,
        });
    }
    Ok(())
}

/// A group of points sharing the same non-null attendance id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    /// The shared attendance id.
    pub attendance_id: i64,
    /// `(point id, owning user)` pairs in ascending id order; the first
    /// row is kept, the rest deleted. Corrupt legacy groups can span
    /// more than one user, so the owner is carried per row.
    pub rows: Vec<(i64, i64)>,
}

/// Finds all attendance ids owning more than one point.
pub fn duplicate_groups(conn: &Connection) -> EngineResult<Vec<DuplicateGroup>> {
    let mut stmt = conn.prepare(
        "SELECT attendance_id, id, user_id FROM attendance_points
         WHERE attendance_id IN (
            SELECT attendance_id FROM attendance_points
            WHERE attendance_id IS NOT NULL
            GROUP BY attendance_id HAVING COUNT(*) > 1
         )
         ORDER BY attendance_id ASC, id ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut groups: Vec<DuplicateGroup> = Vec::new();
    for row in rows {
        let (attendance_id, id, user_id) = row?;
        match groups.last_mut() {
            Some(g) if g.attendance_id == attendance_id => g.rows.push((id, user_id)),
            _ => groups.push(DuplicateGroup {
                attendance_id,
                rows: vec![(id, user_id)],
            }),
        }
    }
    Ok(groups)
}

/// Distinct users matching a predicate over their points. `sql_where`
/// is a fixed fragment chosen by the caller, never user input.
fn distinct_users(conn: &Connection, sql_where: &str) -> EngineResult<Vec<i64>> {
    let sql = format!(
        "SELECT DISTINCT user_id FROM attendance_points WHERE {sql_where} ORDER BY user_id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
    let mut users = Vec::new();
    for row in rows {
        users.push(row?);
    }
    Ok(users)
}

/// Users holding active, non-excused, GBRO-eligible points.
pub fn users_with_eligible_points(conn: &Connection) -> EngineResult<Vec<i64>> {
    distinct_users(
        conn,
        "eligible_for_gbro = 1 AND is_excused = 0 AND is_expired = 0",
    )
}

/// Users holding eligible active points that were never given a GBRO date.
/// The `initialize_gbro_dates` backfill targets exactly these.
pub fn users_with_uninitialized_gbro(conn: &Connection) -> EngineResult<Vec<i64>> {
    distinct_users(
        conn,
        "eligible_for_gbro = 1 AND is_excused = 0 AND is_expired = 0 AND gbro_expires_at IS NULL",
    )
}

/// Marks pending rows expired for one policy. Does not alter
/// `gbro_expires_at` values.
pub fn expire_pending_sro(conn: &Connection, today: NaiveDate) -> EngineResult<usize> {
    let changed = conn.execute(
        "UPDATE attendance_points
         SET is_expired = 1,
             expiration_type = CASE WHEN eligible_for_gbro = 1 THEN 'sro' ELSE 'none' END
         WHERE is_expired = 0 AND expires_at <= ?1",
        [fmt_date(today)],
    )?;
    Ok(changed)
}

/// Marks pending rows expired under the behavior-based policy.
pub fn expire_pending_gbro(conn: &Connection, today: NaiveDate) -> EngineResult<usize> {
    let changed = conn.execute(
        "UPDATE attendance_points
         SET is_expired = 1, expiration_type = 'gbro'
         WHERE is_expired = 0 AND gbro_expires_at IS NOT NULL AND gbro_expires_at <= ?1",
        [fmt_date(today)],
    )?;
    Ok(changed)
}

/// Fetches expired points, optionally restricted to a set of users.
pub fn expired_points(
    conn: &Connection,
    user_ids: Option<&[i64]>,
) -> EngineResult<Vec<AttendancePoint>> {
    match user_ids {
        None => {
            let mut stmt = conn.prepare(
                "SELECT * FROM attendance_points WHERE is_expired = 1 ORDER BY user_id, id",
            )?;
            collect(stmt.query_map([], map_row)?)
        }
        Some(ids) => {
            let mut out = Vec::new();
            let mut stmt = conn.prepare(
                "SELECT * FROM attendance_points
                 WHERE is_expired = 1 AND user_id = ?1 ORDER BY id",
            )?;
            for id in ids {
                let rows = stmt.query_map([id], map_row)?;
                for row in rows {
                    out.push(row?);
                }
            }
            Ok(out)
        }
    }
}

/// Aggregate health counters for operational dashboards.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ManagementCounts {
    /// All rows in the store.
    pub total: usize,
    /// Neither excused nor expired.
    pub active: usize,
    /// Excused rows.
    pub excused: usize,
    /// Expired rows.
    pub expired: usize,
    /// Rows governed by no behavior policy (fixed duration only).
    pub expiration_none: usize,
    /// Rows currently governed (or lapsed) under the SRO ceiling.
    pub expiration_sro: usize,
    /// Rows currently governed (or lapsed) under the GBRO policy.
    pub expiration_gbro: usize,
    /// Eligible active rows whose GBRO window is suppressed.
    pub suppressed_gbro: usize,
}

/// Computes the [`ManagementCounts`] rollup.
pub fn management_counts(conn: &Connection) -> EngineResult<ManagementCounts> {
    let count = |sql: &str| -> EngineResult<usize> {
        let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n as usize)
    };
    Ok(ManagementCounts {
        total: count("SELECT COUNT(*) FROM attendance_points")?,
        active: count(
            "SELECT COUNT(*) FROM attendance_points WHERE is_excused = 0 AND is_expired = 0",
        )?,
        excused: count("SELECT COUNT(*) FROM attendance_points WHERE is_excused = 1")?,
        expired: count("SELECT COUNT(*) FROM attendance_points WHERE is_expired = 1")?,
        expiration_none: count(
            "SELECT COUNT(*) FROM attendance_points WHERE expiration_type = 'none'",
        )?,
        expiration_sro: count(
            "SELECT COUNT(*) FROM attendance_points WHERE expiration_type = 'sro'",
        )?,
        expiration_gbro: count(
            "SELECT COUNT(*) FROM attendance_points WHERE expiration_type = 'gbro'",
        )?,
        suppressed_gbro: count(
            "SELECT COUNT(*) FROM attendance_points
             WHERE eligible_for_gbro = 1 AND is_excused = 0 AND is_expired = 0
               AND gbro_expires_at IS NULL AND expiration_type = 'sro'",
        )?,
    })
}

fn collect(
    rows: impl Iterator<Item = rusqlite::Result<AttendancePoint>>,
) -> EngineResult<Vec<AttendancePoint>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
