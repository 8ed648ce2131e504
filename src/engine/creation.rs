//! The Point Creation Service.
//!
//! Builds new point records — manual or derived from attendance outcomes —
//! using the classifier, sets the initial expiration fields, and triggers
//! the owner's GBRO cascade inside the same transaction. Either the point
//! row and the recomputed expiration state for the user's eligible set
//! commit together, or neither does.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::classification::{classify, violation_details};
use crate::config::PolicyConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::{AttendanceOutcome, AttendancePoint, Capabilities, ExpirationType, PointType};
use crate::store::{self, NewPoint, PointStore};

use super::cascade::apply_cascade;
use super::notifier::Notifier;

/// Why `create_from_attendance` declined to create a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A point already exists for this attendance record.
    AlreadyPorted,
    /// The attendance record has not been admin-verified.
    NotVerified,
    /// The status does not constitute a violation.
    NoViolation,
}

/// The result of deriving a point from an attendance outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum CreationOutcome {
    /// A new point was persisted and cascaded.
    Created(AttendancePoint),
    /// No point was created; a no-op, not an error.
    Skipped(SkipReason),
}

/// Input for manually entered points.
#[derive(Debug, Clone, Deserialize)]
pub struct ManualPointPayload {
    /// The disciplined employee.
    pub user_id: i64,
    /// The violation date.
    pub shift_date: NaiveDate,
    /// The violation category.
    pub point_type: PointType,
    /// Free-text status/category.
    pub status: String,
    /// Whether the employee gave prior notice.
    #[serde(default)]
    pub is_advised: bool,
    /// Minutes late, for tardy points.
    #[serde(default)]
    pub tardy_minutes: Option<i64>,
    /// Minutes short, for undertime points.
    #[serde(default)]
    pub undertime_minutes: Option<i64>,
    /// Free-form notes.
    #[serde(default)]
    pub notes: Option<String>,
}

/// Partial update for a manual point. `None` fields are left unchanged;
/// the origin (`user_id`, `attendance_id`) can never be changed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManualPointUpdate {
    /// New violation date.
    #[serde(default)]
    pub shift_date: Option<NaiveDate>,
    /// New violation category.
    #[serde(default)]
    pub point_type: Option<PointType>,
    /// New status text.
    #[serde(default)]
    pub status: Option<String>,
    /// New advised flag.
    #[serde(default)]
    pub is_advised: Option<bool>,
    /// New tardy minutes.
    #[serde(default)]
    pub tardy_minutes: Option<i64>,
    /// New undertime minutes.
    #[serde(default)]
    pub undertime_minutes: Option<i64>,
    /// New notes.
    #[serde(default)]
    pub notes: Option<String>,
}

/// Creates, updates, deletes, and excuses points.
#[derive(Clone)]
pub struct CreationService {
    store: Arc<PointStore>,
    policy: PolicyConfig,
    notifier: Arc<dyn Notifier>,
}

impl CreationService {
    /// Creates the service over a shared store.
    pub fn new(store: Arc<PointStore>, policy: PolicyConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            policy,
            notifier,
        }
    }

    /// Derives a point from a verified attendance outcome.
    ///
    /// A no-op (`Skipped`) when a point already exists for the attendance
    /// id, when the record is unverified, or when the status is not a
    /// violation. On creation the owner's full GBRO timeline is recomputed
    /// within the same transaction, which also marks any earlier point
    /// whose window has elapsed since the last mutation.
    pub fn create_from_attendance(
        &self,
        outcome: &AttendanceOutcome,
        today: NaiveDate,
    ) -> EngineResult<CreationOutcome> {
        if !outcome.admin_verified {
            return Ok(CreationOutcome::Skipped(SkipReason::NotVerified));
        }
        let Some(class) = classify(outcome, &self.policy) else {
            return Ok(CreationOutcome::Skipped(SkipReason::NoViolation));
        };

        let created = self.store.with_tx("create_from_attendance", |tx| {
            // Dedupe check inside the transaction so concurrent rescans of
            // the same record cannot both insert.
            if store::find_by_attendance(tx, outcome.id)?.is_some() {
                return Ok(None);
            }

            let eligible = class.point_type.gbro_eligible();
            let id = store::insert_point(
                tx,
                &NewPoint {
                    user_id: outcome.user_id,
                    attendance_id: Some(outcome.id),
                    shift_date: outcome.shift_date,
                    point_type: class.point_type,
                    points: class.weight,
                    is_manual: false,
                    is_advised: outcome.is_advised,
                    status: outcome.status.as_str().to_string(),
                    expires_at: self.policy.sro_expiry(class.point_type, outcome.shift_date),
                    eligible_for_gbro: eligible,
                    gbro_expires_at: eligible
                        .then(|| self.policy.gbro_window_end(outcome.shift_date)),
                    expiration_type: if eligible {
                        ExpirationType::Gbro
                    } else {
                        ExpirationType::None
                    },
                    tardy_minutes: outcome.tardy_minutes,
                    undertime_minutes: outcome.undertime_minutes,
                    violation_details: violation_details(outcome, class.point_type),
                    notes: None,
                    created_by: None,
                    created_at: Utc::now().naive_utc(),
                },
            )?;

            if eligible {
                apply_cascade(tx, &self.policy, outcome.user_id, today)?;
            }
            Ok(Some(store::get_point(tx, id)?))
        })?;

        match created {
            Some(point) => {
                info!(
                    user_id = point.user_id,
                    point_id = point.id,
                    attendance_id = outcome.id,
                    point_type = point.point_type.as_str(),
                    "point derived from attendance record"
                );
                Ok(CreationOutcome::Created(point))
            }
            None => Ok(CreationOutcome::Skipped(SkipReason::AlreadyPorted)),
        }
    }

    /// Creates an administrator-entered point and notifies the employee.
    pub fn create_manual(
        &self,
        payload: &ManualPointPayload,
        created_by: i64,
        caps: &Capabilities,
        today: NaiveDate,
    ) -> EngineResult<AttendancePoint> {
        Capabilities::require(caps.manage_points, "create manual points")?;
        validate_minutes(payload.tardy_minutes, "tardy_minutes")?;
        validate_minutes(payload.undertime_minutes, "undertime_minutes")?;
        if payload.status.trim().is_empty() {
            return Err(EngineError::Validation {
                field: "status".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        let eligible = payload.point_type.gbro_eligible();
        let details = manual_details(payload);
        let point = self.store.with_tx("create_manual", |tx| {
            let id = store::insert_point(
                tx,
                &NewPoint {
                    user_id: payload.user_id,
                    attendance_id: None,
                    shift_date: payload.shift_date,
                    point_type: payload.point_type,
                    points: self.policy.weight_for(payload.point_type),
                    is_manual: true,
                    is_advised: payload.is_advised,
                    status: payload.status.clone(),
                    expires_at: self.policy.sro_expiry(payload.point_type, payload.shift_date),
                    eligible_for_gbro: eligible,
                    gbro_expires_at: eligible
                        .then(|| self.policy.gbro_window_end(payload.shift_date)),
                    expiration_type: if eligible {
                        ExpirationType::Gbro
                    } else {
                        ExpirationType::None
                    },
                    tardy_minutes: payload.tardy_minutes,
                    undertime_minutes: payload.undertime_minutes,
                    violation_details: details.clone(),
                    notes: payload.notes.clone(),
                    created_by: Some(created_by),
                    created_at: Utc::now().naive_utc(),
                },
            )?;
            if eligible {
                apply_cascade(tx, &self.policy, payload.user_id, today)?;
            }
            store::get_point(tx, id)
        })?;

        info!(
            user_id = point.user_id,
            point_id = point.id,
            created_by,
            "manual point created"
        );
        self.notifier.point_recorded(point.user_id, &details);
        Ok(point)
    }

    /// Updates a manual point's fields (never its origin). Re-derives the
    /// expiration fields when the shift date or type changed, and
    /// recascades when the change affects the GBRO timeline.
    pub fn update_manual(
        &self,
        point_id: i64,
        update: &ManualPointUpdate,
        caps: &Capabilities,
        today: NaiveDate,
    ) -> EngineResult<AttendancePoint> {
        Capabilities::require(caps.manage_points, "update manual points")?;
        validate_minutes(update.tardy_minutes, "tardy_minutes")?;
        validate_minutes(update.undertime_minutes, "undertime_minutes")?;

        let point = self.store.with_tx("update_manual", |tx| {
            let mut point = store::get_point(tx, point_id)?;
            if !point.is_manual {
                warn!(point_id, "rejected update of system-generated point");
                return Err(EngineError::ImmutableRecord { point_id });
            }

            let old_shift = point.shift_date;
            let old_type = point.point_type;

            if let Some(shift_date) = update.shift_date {
                point.shift_date = shift_date;
            }
            if let Some(point_type) = update.point_type {
                point.point_type = point_type;
            }
            if let Some(status) = &update.status {
                point.status = status.clone();
            }
            if let Some(is_advised) = update.is_advised {
                point.is_advised = is_advised;
            }
            if let Some(minutes) = update.tardy_minutes {
                point.tardy_minutes = Some(minutes);
            }
            if let Some(minutes) = update.undertime_minutes {
                point.undertime_minutes = Some(minutes);
            }
            if let Some(notes) = &update.notes {
                point.notes = Some(notes.clone());
            }

            let rederive = point.shift_date != old_shift || point.point_type != old_type;
            if rederive {
                let eligible = point.point_type.gbro_eligible();
                point.points = self.policy.weight_for(point.point_type);
                point.expires_at = self.policy.sro_expiry(point.point_type, point.shift_date);
                point.eligible_for_gbro = eligible;
                point.gbro_expires_at =
                    eligible.then(|| self.policy.gbro_window_end(point.shift_date));
                point.expiration_type = if eligible {
                    ExpirationType::Gbro
                } else {
                    ExpirationType::None
                };
            }
            store::update_point(tx, &point)?;

            if rederive {
                apply_cascade(tx, &self.policy, point.user_id, today)?;
            }
            store::get_point(tx, point_id)
        })?;

        info!(point_id, user_id = point.user_id, "manual point updated");
        self.notifier
            .point_recorded(point.user_id, &point.violation_details);
        Ok(point)
    }

    /// Hard-deletes a manual point and recascades the owner's timeline.
    pub fn delete_manual(
        &self,
        point_id: i64,
        caps: &Capabilities,
        today: NaiveDate,
    ) -> EngineResult<()> {
        Capabilities::require(caps.manage_points, "delete manual points")?;

        let user_id = self.store.with_tx("delete_manual", |tx| {
            let point = store::get_point(tx, point_id)?;
            if !point.is_manual {
                warn!(point_id, "rejected delete of system-generated point");
                return Err(EngineError::ImmutableRecord { point_id });
            }
            store::delete_point(tx, point_id)?;
            apply_cascade(tx, &self.policy, point.user_id, today)?;
            Ok(point.user_id)
        })?;

        info!(point_id, user_id, "manual point deleted");
        Ok(())
    }

    /// Excuses a point: it stays in history but leaves the active
    /// disciplinary totals and the GBRO timeline.
    pub fn excuse(
        &self,
        point_id: i64,
        excused_by: i64,
        reason: Option<String>,
        caps: &Capabilities,
        today: NaiveDate,
    ) -> EngineResult<AttendancePoint> {
        Capabilities::require(caps.excuse_points, "excuse points")?;

        let point = self.store.with_tx("excuse", |tx| {
            let mut point = store::get_point(tx, point_id)?;
            if point.is_excused {
                return Err(EngineError::Validation {
                    field: "is_excused".to_string(),
                    message: format!("point {point_id} is already excused"),
                });
            }
            point.is_excused = true;
            point.excused_by = Some(excused_by);
            point.excused_at = Some(Utc::now().naive_utc());
            point.excuse_reason = reason.clone();
            store::update_point(tx, &point)?;
            apply_cascade(tx, &self.policy, point.user_id, today)?;
            store::get_point(tx, point_id)
        })?;

        info!(point_id, user_id = point.user_id, excused_by, "point excused");
        Ok(point)
    }

    /// Reverses an excuse, returning the point to the active set and
    /// recascading the owner's timeline.
    pub fn unexcuse(
        &self,
        point_id: i64,
        caps: &Capabilities,
        today: NaiveDate,
    ) -> EngineResult<AttendancePoint> {
        Capabilities::require(caps.excuse_points, "un-excuse points")?;

        let point = self.store.with_tx("unexcuse", |tx| {
            let mut point = store::get_point(tx, point_id)?;
            if !point.is_excused {
                return Err(EngineError::Validation {
                    field: "is_excused".to_string(),
                    message: format!("point {point_id} is not excused"),
                });
            }
            point.is_excused = false;
            point.excused_by = None;
            point.excused_at = None;
            point.excuse_reason = None;
            store::update_point(tx, &point)?;
            apply_cascade(tx, &self.policy, point.user_id, today)?;
            store::get_point(tx, point_id)
        })?;

        info!(point_id, user_id = point.user_id, "point un-excused");
        Ok(point)
    }
}

fn validate_minutes(minutes: Option<i64>, field: &str) -> EngineResult<()> {
    match minutes {
        Some(m) if m < 0 => Err(EngineError::Validation {
            field: field.to_string(),
            message: "must not be negative".to_string(),
        }),
        _ => Ok(()),
    }
}

fn manual_details(payload: &ManualPointPayload) -> String {
    format!(
        "{} recorded manually for {} ({})",
        payload.point_type.as_str(),
        payload.shift_date,
        payload.status
    )
}
