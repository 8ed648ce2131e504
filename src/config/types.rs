//! Policy configuration types.
//!
//! This module contains the strongly-typed policy structures that are
//! deserialized from the YAML policy file. All classification thresholds
//! and expiration durations are table-driven so they can be tuned without
//! touching call sites.

use chrono::{Days, Months, NaiveDate};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::models::PointType;

/// Disciplinary weight per point type.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PointWeights {
    /// Weight for a tardy point.
    pub tardy: Decimal,
    /// Weight for an undertime point.
    pub undertime: Decimal,
    /// Weight for a severe undertime point.
    pub undertime_severe: Decimal,
    /// Weight for a half-day absence.
    pub half_day_absence: Decimal,
    /// Weight for an advised whole-day absence.
    pub whole_day_absence_advised: Decimal,
    /// Weight for an unadvised whole-day absence (NCNS).
    pub whole_day_absence_unadvised: Decimal,
}

/// The complete attendance-point policy.
///
/// # Example
///
/// ```
/// use point_engine::config::PolicyConfig;
/// use point_engine::models::PointType;
/// use chrono::NaiveDate;
///
/// let policy = PolicyConfig::default();
/// let shift = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
///
/// // Tardy points lapse after six months under the fixed (SRO) policy...
/// assert_eq!(
///     policy.sro_expiry(PointType::Tardy, shift),
///     NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()
/// );
/// // ...and after a 60-day clean window under the behavior (GBRO) policy.
/// assert_eq!(
///     policy.gbro_window_end(shift),
///     NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PolicyConfig {
    /// Undertime beyond this many minutes classifies as severe.
    pub severe_undertime_minutes: i64,
    /// Length of the GBRO clean-conduct window in days.
    pub gbro_window_days: u64,
    /// Fixed expiration in months for most point types.
    pub sro_months: u32,
    /// Fixed expiration in months for unadvised whole-day absences.
    pub sro_unadvised_months: u32,
    /// Weight table.
    pub weights: PointWeights,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            severe_undertime_minutes: 60,
            gbro_window_days: 60,
            sro_months: 6,
            sro_unadvised_months: 12,
            weights: PointWeights {
                tardy: Decimal::new(5, 1),                       // 0.5
                undertime: Decimal::new(5, 1),                   // 0.5
                undertime_severe: Decimal::new(1, 0),            // 1.0
                half_day_absence: Decimal::new(1, 0),            // 1.0
                whole_day_absence_advised: Decimal::new(15, 1),  // 1.5
                whole_day_absence_unadvised: Decimal::new(3, 0), // 3.0
            },
        }
    }
}

impl PolicyConfig {
    /// Returns the disciplinary weight for a point type.
    pub fn weight_for(&self, point_type: PointType) -> Decimal {
        match point_type {
            PointType::Tardy => self.weights.tardy,
            PointType::Undertime => self.weights.undertime,
            PointType::UndertimeSevere => self.weights.undertime_severe,
            PointType::HalfDayAbsence => self.weights.half_day_absence,
            PointType::WholeDayAbsenceAdvised => self.weights.whole_day_absence_advised,
            PointType::WholeDayAbsenceUnadvised => self.weights.whole_day_absence_unadvised,
        }
    }

    /// Computes the fixed-duration (SRO) expiration date for a point:
    /// `sro_unadvised_months` after the shift date for unadvised whole-day
    /// absences, `sro_months` otherwise.
    pub fn sro_expiry(&self, point_type: PointType, shift_date: NaiveDate) -> NaiveDate {
        let months = if point_type == PointType::WholeDayAbsenceUnadvised {
            self.sro_unadvised_months
        } else {
            self.sro_months
        };
        // Clamped at the calendar horizon; real shift dates never get there.
        shift_date
            .checked_add_months(Months::new(months))
            .unwrap_or(NaiveDate::MAX)
    }

    /// Computes the end of a point's GBRO clean-conduct window.
    pub fn gbro_window_end(&self, shift_date: NaiveDate) -> NaiveDate {
        shift_date
            .checked_add_days(Days::new(self.gbro_window_days))
            .unwrap_or(NaiveDate::MAX)
    }
}
