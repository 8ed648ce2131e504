//! The Point Classifier.
//!
//! A pure function mapping a raw attendance outcome (status, advised flag,
//! tardy/undertime minutes) to a point type and weight. Total over the
//! finite set of statuses the Attendance subsystem produces: violating
//! statuses yield a [`PointClass`], non-violating statuses yield `None`,
//! and no input ever yields an error. Severity thresholds come from the
//! policy table, not from call sites.

use rust_decimal::Decimal;

use crate::config::PolicyConfig;
use crate::models::{AttendanceOutcome, AttendanceStatus, PointType};

/// A classified violation: the point type and its disciplinary weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointClass {
    /// The violation category.
    pub point_type: PointType,
    /// The weight from the policy table.
    pub weight: Decimal,
}

/// Classifies an attendance outcome into a point type and weight.
///
/// Returns `None` for non-violating statuses (present, rest day, leave,
/// holiday).
///
/// # Examples
///
/// ```
/// use point_engine::classification::classify;
/// use point_engine::config::PolicyConfig;
/// use point_engine::models::{AttendanceOutcome, AttendanceStatus, PointType};
/// use chrono::NaiveDate;
///
/// let policy = PolicyConfig::default();
/// let outcome = AttendanceOutcome {
///     id: 1,
///     user_id: 10,
///     shift_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
///     status: AttendanceStatus::Undertime,
///     is_advised: false,
///     tardy_minutes: None,
///     undertime_minutes: Some(75),
///     admin_verified: true,
/// };
///
/// // More than an hour of undertime classifies as severe.
/// let class = classify(&outcome, &policy).unwrap();
/// assert_eq!(class.point_type, PointType::UndertimeSevere);
/// ```
pub fn classify(outcome: &AttendanceOutcome, policy: &PolicyConfig) -> Option<PointClass> {
    let point_type = match outcome.status {
        AttendanceStatus::Present
        | AttendanceStatus::RestDay
        | AttendanceStatus::OnLeave
        | AttendanceStatus::Holiday => return None,
        AttendanceStatus::Tardy => PointType::Tardy,
        AttendanceStatus::Undertime => {
            if outcome.undertime_minutes.unwrap_or(0) > policy.severe_undertime_minutes {
                PointType::UndertimeSevere
            } else {
                PointType::Undertime
            }
        }
        AttendanceStatus::HalfDayAbsence => PointType::HalfDayAbsence,
        AttendanceStatus::WholeDayAbsence => {
            if outcome.is_advised {
                PointType::WholeDayAbsenceAdvised
            } else {
                PointType::WholeDayAbsenceUnadvised
            }
        }
    };

    Some(PointClass {
        point_type,
        weight: policy.weight_for(point_type),
    })
}

/// Builds the human-readable violation summary stored on a point at
/// creation time.
pub fn violation_details(outcome: &AttendanceOutcome, point_type: PointType) -> String {
    let date = outcome.shift_date;
    match point_type {
        PointType::Tardy => format!(
            "Tardy by {} minute(s) on {}",
            outcome.tardy_minutes.unwrap_or(0),
            date
        ),
        PointType::Undertime => format!(
            "Undertime by {} minute(s) on {}",
            outcome.undertime_minutes.unwrap_or(0),
            date
        ),
        PointType::UndertimeSevere => format!(
            "Undertime by {} minute(s) (beyond the severe threshold) on {}",
            outcome.undertime_minutes.unwrap_or(0),
            date
        ),
        PointType::HalfDayAbsence => format!("Half-day absence on {}", date),
        PointType::WholeDayAbsenceAdvised => {
            format!("Whole-day absence with prior notice on {}", date)
        }
        PointType::WholeDayAbsenceUnadvised => {
            format!("Whole-day absence without prior notice on {}", date)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn outcome(status: AttendanceStatus) -> AttendanceOutcome {
        AttendanceOutcome {
            id: 1,
            user_id: 10,
            shift_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            status,
            is_advised: false,
            tardy_minutes: None,
            undertime_minutes: None,
            admin_verified: true,
        }
    }

    #[test]
    fn test_non_violating_statuses_yield_none() {
        let policy = PolicyConfig::default();
        for status in [
            AttendanceStatus::Present,
            AttendanceStatus::RestDay,
            AttendanceStatus::OnLeave,
            AttendanceStatus::Holiday,
        ] {
            assert_eq!(classify(&outcome(status), &policy), None);
        }
    }

    #[test]
    fn test_tardy_classifies_as_tardy() {
        let policy = PolicyConfig::default();
        let mut o = outcome(AttendanceStatus::Tardy);
        o.tardy_minutes = Some(15);
        let class = classify(&o, &policy).unwrap();
        assert_eq!(class.point_type, PointType::Tardy);
        assert_eq!(class.weight, policy.weights.tardy);
    }

    #[test]
    fn test_undertime_at_threshold_is_not_severe() {
        let policy = PolicyConfig::default();
        let mut o = outcome(AttendanceStatus::Undertime);
        o.undertime_minutes = Some(60);
        assert_eq!(
            classify(&o, &policy).unwrap().point_type,
            PointType::Undertime
        );
    }

    #[test]
    fn test_undertime_beyond_threshold_is_severe() {
        let policy = PolicyConfig::default();
        let mut o = outcome(AttendanceStatus::Undertime);
        o.undertime_minutes = Some(61);
        assert_eq!(
            classify(&o, &policy).unwrap().point_type,
            PointType::UndertimeSevere
        );
    }

    #[test]
    fn test_severe_threshold_is_table_driven() {
        let mut policy = PolicyConfig::default();
        policy.severe_undertime_minutes = 30;
        let mut o = outcome(AttendanceStatus::Undertime);
        o.undertime_minutes = Some(45);
        assert_eq!(
            classify(&o, &policy).unwrap().point_type,
            PointType::UndertimeSevere
        );
    }

    #[test]
    fn test_whole_day_absence_splits_on_advised_flag() {
        let policy = PolicyConfig::default();
        let mut o = outcome(AttendanceStatus::WholeDayAbsence);
        assert_eq!(
            classify(&o, &policy).unwrap().point_type,
            PointType::WholeDayAbsenceUnadvised
        );
        o.is_advised = true;
        assert_eq!(
            classify(&o, &policy).unwrap().point_type,
            PointType::WholeDayAbsenceAdvised
        );
    }

    #[test]
    fn test_violation_details_mentions_minutes() {
        let mut o = outcome(AttendanceStatus::Tardy);
        o.tardy_minutes = Some(12);
        let details = violation_details(&o, PointType::Tardy);
        assert!(details.contains("12 minute(s)"));
        assert!(details.contains("2024-01-01"));
    }

    proptest! {
        /// Classifier totality: for every status the Attendance subsystem
        /// can produce, classification returns a defined class or `None`,
        /// never panicking, regardless of the flags and minutes attached.
        #[test]
        fn prop_classify_is_total(
            status_idx in 0usize..8,
            is_advised in any::<bool>(),
            tardy in proptest::option::of(0i64..2000),
            undertime in proptest::option::of(0i64..2000),
        ) {
            let policy = PolicyConfig::default();
            let o = AttendanceOutcome {
                id: 1,
                user_id: 1,
                shift_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                status: AttendanceStatus::all()[status_idx],
                is_advised,
                tardy_minutes: tardy,
                undertime_minutes: undertime,
                admin_verified: true,
            };
            let class = classify(&o, &policy);
            if let Some(c) = class {
                prop_assert_eq!(c.weight, policy.weight_for(c.point_type));
            }
        }

        /// The same input always classifies the same way.
        #[test]
        fn prop_classify_is_deterministic(
            status_idx in 0usize..8,
            is_advised in any::<bool>(),
            undertime in proptest::option::of(0i64..2000),
        ) {
            let policy = PolicyConfig::default();
            let mut o = outcome(AttendanceStatus::all()[status_idx]);
            o.is_advised = is_advised;
            o.undertime_minutes = undertime;
            prop_assert_eq!(classify(&o, &policy), classify(&o, &policy));
        }
    }
}
