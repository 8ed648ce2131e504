//! Attendance outcome records consumed from the Attendance subsystem.
//!
//! The Point Engine never stores these; it only reads verified outcomes
//! and derives points from them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

/// The finite set of attendance statuses the upstream Attendance subsystem
/// produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    /// Worked the full scheduled shift.
    Present,
    /// Not scheduled to work.
    RestDay,
    /// Approved leave.
    OnLeave,
    /// Public holiday.
    Holiday,
    /// Arrived late.
    Tardy,
    /// Left early; severity depends on the undertime minutes.
    Undertime,
    /// Absent for half of the scheduled shift.
    HalfDayAbsence,
    /// Absent for the whole day; advised/unadvised split on `is_advised`.
    WholeDayAbsence,
}

impl AttendanceStatus {
    /// All statuses the upstream subsystem can produce. The classifier must
    /// be total over this set.
    pub fn all() -> [AttendanceStatus; 8] {
        [
            AttendanceStatus::Present,
            AttendanceStatus::RestDay,
            AttendanceStatus::OnLeave,
            AttendanceStatus::Holiday,
            AttendanceStatus::Tardy,
            AttendanceStatus::Undertime,
            AttendanceStatus::HalfDayAbsence,
            AttendanceStatus::WholeDayAbsence,
        ]
    }

    /// Returns the stable string form, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::RestDay => "rest_day",
            AttendanceStatus::OnLeave => "on_leave",
            AttendanceStatus::Holiday => "holiday",
            AttendanceStatus::Tardy => "tardy",
            AttendanceStatus::Undertime => "undertime",
            AttendanceStatus::HalfDayAbsence => "half_day_absence",
            AttendanceStatus::WholeDayAbsence => "whole_day_absence",
        }
    }
}

/// A single attendance outcome record, as exposed by the Attendance
/// subsystem. Only records with `admin_verified = true` ever produce points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceOutcome {
    /// The attendance record id (unique upstream).
    pub id: i64,
    /// The employee the record belongs to.
    pub user_id: i64,
    /// The calendar date of the shift.
    pub shift_date: NaiveDate,
    /// The attendance status.
    pub status: AttendanceStatus,
    /// Whether the employee gave prior notice.
    #[serde(default)]
    pub is_advised: bool,
    /// Minutes late, when status is tardy.
    #[serde(default)]
    pub tardy_minutes: Option<i64>,
    /// Minutes short, when status is undertime.
    #[serde(default)]
    pub undertime_minutes: Option<i64>,
    /// Whether an administrator has verified the record.
    #[serde(default)]
    pub admin_verified: bool,
}

/// Source of verified attendance outcomes for backfill and regeneration.
///
/// The Attendance subsystem is an external collaborator; this trait is the
/// narrow seam through which the Maintenance Service reads it.
pub trait AttendanceSource: Send + Sync {
    /// Returns the admin-verified outcomes with shift dates in the
    /// inclusive range, optionally scoped to a single user.
    fn verified_in_range(
        &self,
        date_from: NaiveDate,
        date_to: NaiveDate,
        user_id: Option<i64>,
    ) -> EngineResult<Vec<AttendanceOutcome>>;
}

/// An [`AttendanceSource`] backed by a plain vector of records.
///
/// Used by the rescan import path (the upstream posts a batch of verified
/// outcomes) and by tests.
#[derive(Debug, Clone, Default)]
pub struct VecAttendanceSource {
    records: Vec<AttendanceOutcome>,
}

impl VecAttendanceSource {
    /// Wraps a batch of outcome records.
    pub fn new(records: Vec<AttendanceOutcome>) -> Self {
        Self { records }
    }
}

impl AttendanceSource for VecAttendanceSource {
    fn verified_in_range(
        &self,
        date_from: NaiveDate,
        date_to: NaiveDate,
        user_id: Option<i64>,
    ) -> EngineResult<Vec<AttendanceOutcome>> {
        Ok(self
            .records
            .iter()
            .filter(|r| {
                r.admin_verified
                    && r.shift_date >= date_from
                    && r.shift_date <= date_to
                    && user_id.is_none_or(|u| r.user_id == u)
            })
            .cloned()
            .collect())
    }
}
