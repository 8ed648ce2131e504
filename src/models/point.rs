//! Attendance point model and related types.
//!
//! This module defines the [`AttendancePoint`] struct — the central entity
//! of the engine — plus the [`PointType`] and [`ExpirationType`] enums.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The category of attendance violation a point was assigned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointType {
    /// Late arrival.
    Tardy,
    /// Left before the end of the scheduled shift.
    Undertime,
    /// Undertime beyond the severe threshold (more than an hour by default).
    UndertimeSevere,
    /// Absent for half of the scheduled shift.
    HalfDayAbsence,
    /// Absent for the whole day with prior notice.
    WholeDayAbsenceAdvised,
    /// Absent for the whole day without prior notice (NCNS / first-time no-show).
    WholeDayAbsenceUnadvised,
}

impl PointType {
    /// Returns whether points of this type participate in behavior-based
    /// (GBRO) expiration.
    ///
    /// Unadvised whole-day absences never do; they lapse only on their
    /// fixed one-year date.
    ///
    /// # Examples
    ///
    /// ```
    /// use point_engine::models::PointType;
    ///
    /// assert!(PointType::Tardy.gbro_eligible());
    /// assert!(!PointType::WholeDayAbsenceUnadvised.gbro_eligible());
    /// ```
    pub fn gbro_eligible(&self) -> bool {
        !matches!(self, PointType::WholeDayAbsenceUnadvised)
    }

    /// Returns the stable string form used in the point store.
    pub fn as_str(&self) -> &'static str {
        match self {
            PointType::Tardy => "tardy",
            PointType::Undertime => "undertime",
            PointType::UndertimeSevere => "undertime_severe",
            PointType::HalfDayAbsence => "half_day_absence",
            PointType::WholeDayAbsenceAdvised => "whole_day_absence_advised",
            PointType::WholeDayAbsenceUnadvised => "whole_day_absence_unadvised",
        }
    }

    /// Parses the stable string form used in the point store.
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "tardy" => Some(PointType::Tardy),
            "undertime" => Some(PointType::Undertime),
            "undertime_severe" => Some(PointType::UndertimeSevere),
            "half_day_absence" => Some(PointType::HalfDayAbsence),
            "whole_day_absence_advised" => Some(PointType::WholeDayAbsenceAdvised),
            "whole_day_absence_unadvised" => Some(PointType::WholeDayAbsenceUnadvised),
            _ => None,
        }
    }

    /// All point types, in severity order. Used by statistics breakdowns.
    pub fn all() -> [PointType; 6] {
        [
            PointType::Tardy,
            PointType::Undertime,
            PointType::UndertimeSevere,
            PointType::HalfDayAbsence,
            PointType::WholeDayAbsenceAdvised,
            PointType::WholeDayAbsenceUnadvised,
        ]
    }
}

/// Which expiration policy governs (or governed) a point's lapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationType {
    /// Fixed-duration lapse only; the point never enters the GBRO timeline.
    None,
    /// The fixed (SRO) date is the effective governor — either the point's
    /// GBRO window is currently suppressed, or it lapsed on the SRO date.
    Sro,
    /// The behavior-based (GBRO) date governs.
    Gbro,
}

impl ExpirationType {
    /// Returns the stable string form used in the point store.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpirationType::None => "none",
            ExpirationType::Sro => "sro",
            ExpirationType::Gbro => "gbro",
        }
    }

    /// Parses the stable string form used in the point store.
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "none" => Some(ExpirationType::None),
            "sro" => Some(ExpirationType::Sro),
            "gbro" => Some(ExpirationType::Gbro),
            _ => None,
        }
    }
}

/// A disciplinary point accrued for an attendance violation.
///
/// Points are owned by exactly one user and ordered within that user's
/// history by `shift_date` (ties broken by `id`). System-derived points
/// (`is_manual = false`) are immutable except through excuse/un-excuse and
/// expiration maintenance; manual points may be edited or hard-deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendancePoint {
    /// Unique identifier.
    pub id: i64,
    /// The disciplined employee who owns this point.
    pub user_id: i64,
    /// Source attendance record, when system-derived. `None` marks a
    /// manually created point. At most one point exists per attendance id.
    pub attendance_id: Option<i64>,
    /// The calendar date the violation pertains to; the ordering key for
    /// all cascade logic.
    pub shift_date: NaiveDate,
    /// The violation category.
    pub point_type: PointType,
    /// The disciplinary weight assigned by the classifier.
    pub points: Decimal,
    /// True for administrator-entered points.
    pub is_manual: bool,
    /// Whether the employee gave prior notice.
    pub is_advised: bool,
    /// Denormalized copy of the source attendance status (free text for
    /// manual points).
    pub status: String,
    /// Whether the point has been excused. Excused points stay in history
    /// but carry no disciplinary weight and are outside the GBRO timeline.
    pub is_excused: bool,
    /// Administrator who excused the point.
    pub excused_by: Option<i64>,
    /// When the point was excused.
    pub excused_at: Option<NaiveDateTime>,
    /// Reason recorded at excuse time.
    pub excuse_reason: Option<String>,
    /// Free-form notes.
    pub notes: Option<String>,
    /// Whether the point has lapsed under either policy.
    pub is_expired: bool,
    /// Which policy governs (or governed) this point's lapse.
    pub expiration_type: ExpirationType,
    /// Fixed-duration (SRO) expiration date: one year from the shift date
    /// for unadvised absences, six months otherwise.
    pub expires_at: NaiveDate,
    /// Whether this point participates in behavior-based expiration.
    pub eligible_for_gbro: bool,
    /// Behavior-based expiration date. `None` until first computed, or
    /// while the point's window is suppressed by a later violation.
    pub gbro_expires_at: Option<NaiveDate>,
    /// Minutes late, for tardy points.
    pub tardy_minutes: Option<i64>,
    /// Minutes short, for undertime points.
    pub undertime_minutes: Option<i64>,
    /// Human-readable summary of the triggering attendance record,
    /// generated at creation time.
    pub violation_details: String,
    /// Administrator id for manual points.
    pub created_by: Option<i64>,
    /// When the point record was created.
    pub created_at: NaiveDateTime,
}

impl AttendancePoint {
    /// Returns true when the point carries active disciplinary weight:
    /// neither excused nor expired.
    pub fn is_active(&self) -> bool {
        !self.is_excused && !self.is_expired
    }

}
