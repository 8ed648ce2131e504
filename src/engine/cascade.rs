//! The Behavior-Expiration Service: the GBRO cascade.
//!
//! Each GBRO-eligible point opens a clean-conduct window of
//! `gbro_window_days` after its shift date. The point's behavior-based
//! expiration is its own window end unless a later live point in the user's
//! timeline falls inside that window, in which case the window is
//! suppressed and the fixed (SRO) date becomes the effective ceiling.
//!
//! Because suppression depends on the full ordered set, the cascade always
//! materializes the user's points as an explicit sequence sorted by shift
//! date then id, and recomputes the whole timeline in one pass. This module
//! is the single owner of `gbro_expires_at`: no other component writes that
//! column.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use crate::config::PolicyConfig;
use crate::error::EngineResult;
use crate::models::{AttendancePoint, ExpirationType};
use crate::store::{self, PointStore};

/// The recomputed expiration state for one point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GbroOutcome {
    /// The point this outcome applies to.
    pub point_id: i64,
    /// The recomputed behavior-based expiration date; `None` when the
    /// window is suppressed or the point is not GBRO-eligible.
    pub gbro_expires_at: Option<NaiveDate>,
    /// The policy now governing the point's lapse.
    pub expiration_type: ExpirationType,
    /// Whether the point has lapsed under either policy as of `today`.
    pub is_expired: bool,
}

/// Recomputes the GBRO timeline for one user's point set.
///
/// Input may be the user's full point history; excused and already-expired
/// rows are skipped (they sit outside the live timeline and their
/// stored state is left alone). The remaining points are sorted by shift
/// date ascending, ties broken by id ascending, and walked back-to-front:
/// a point's window is suppressed exactly when a later point that is
/// itself still live (not lapsed as of `today`) falls inside the window.
/// Computing liveness back-to-front makes the result a fixpoint, so a
/// second run with no intervening mutation returns identical outcomes.
///
/// Pure: no I/O, no mutation of the inputs.
///
/// # Examples
///
/// ```
/// use point_engine::engine::plan_cascade;
/// use point_engine::config::PolicyConfig;
/// use chrono::NaiveDate;
/// # use point_engine::models::{AttendancePoint, ExpirationType, PointType};
/// # use rust_decimal::Decimal;
/// # fn point(id: i64, shift: &str) -> AttendancePoint {
/// #     let shift_date = NaiveDate::parse_from_str(shift, "%Y-%m-%d").unwrap();
/// #     AttendancePoint {
/// #         id, user_id: 1, attendance_id: Some(id), shift_date,
/// #         point_type: PointType::Tardy, points: Decimal::new(5, 1),
/// #         is_manual: false, is_advised: false, status: "tardy".into(),
/// #         is_excused: false, excused_by: None, excused_at: None,
/// #         excuse_reason: None, notes: None, is_expired: false,
/// #         expiration_type: ExpirationType::Gbro,
/// #         expires_at: shift_date.checked_add_months(chrono::Months::new(6)).unwrap(),
/// #         eligible_for_gbro: true, gbro_expires_at: None,
/// #         tardy_minutes: None, undertime_minutes: None,
/// #         violation_details: String::new(), created_by: None,
/// #         created_at: shift_date.and_hms_opt(0, 0, 0).unwrap(),
/// #     }
/// # }
/// let policy = PolicyConfig::default();
/// let today = NaiveDate::from_ymd_opt(2024, 2, 20).unwrap();
///
/// // Two points 45 days apart: the second interrupts the first's window.
/// let points = vec![point(1, "2024-01-01"), point(2, "2024-02-15")];
/// let plan = plan_cascade(&points, &policy, today);
///
/// assert_eq!(plan[0].gbro_expires_at, None); // suppressed
/// assert_eq!(
///     plan[1].gbro_expires_at,
///     Some(NaiveDate::from_ymd_opt(2024, 4, 15).unwrap())
/// );
/// ```
pub fn plan_cascade(
    points: &[AttendancePoint],
    policy: &PolicyConfig,
    today: NaiveDate,
) -> Vec<GbroOutcome> {
    // Explicit ordered-sequence materialization; never rely on arrival order.
    let mut ordered: Vec<&AttendancePoint> = points
        .iter()
        .filter(|p| !p.is_excused && !p.is_expired)
        .collect();
    ordered.sort_by_key(|p| (p.shift_date, p.id));

    let mut outcomes = Vec::with_capacity(ordered.len());
    // Shift date of the nearest later point that is still live.
    let mut next_live: Option<NaiveDate> = None;

    for point in ordered.iter().rev() {
        let outcome = if !point.eligible_for_gbro {
            // Fixed-duration only; never holds a window and never suppresses.
            GbroOutcome {
                point_id: point.id,
                gbro_expires_at: None,
                expiration_type: ExpirationType::None,
                is_expired: today >= point.expires_at,
            }
        } else {
            let window_end = policy.gbro_window_end(point.shift_date);
            let suppressed = next_live.is_some_and(|later| later < window_end);

            let (gbro_expires_at, expiration_type, is_expired) = if suppressed {
                // The SRO ceiling governs until the interrupting point lapses.
                (None, ExpirationType::Sro, today >= point.expires_at)
            } else if today >= window_end {
                (Some(window_end), ExpirationType::Gbro, true)
            } else if today >= point.expires_at {
                (Some(window_end), ExpirationType::Sro, true)
            } else {
                (Some(window_end), ExpirationType::Gbro, false)
            };

            if !is_expired {
                next_live = Some(point.shift_date);
            }

            GbroOutcome {
                point_id: point.id,
                gbro_expires_at,
                expiration_type,
                is_expired,
            }
        };
        outcomes.push(outcome);
    }

    outcomes.reverse();
    outcomes
}

/// Runs a full cascade for a user inside an existing transaction, writing
/// only the rows whose computed state differs from the stored state.
/// Returns the number of rows written.
pub(crate) fn apply_cascade(
    conn: &Connection,
    policy: &PolicyConfig,
    user_id: i64,
    today: NaiveDate,
) -> EngineResult<usize> {
    let points = store::points_for_user(conn, user_id)?;
    persist_plan(conn, &points, plan_cascade(&points, policy, today))
}

fn persist_plan(
    conn: &Connection,
    points: &[AttendancePoint],
    plan: Vec<GbroOutcome>,
) -> EngineResult<usize> {
    let stored: HashMap<i64, &AttendancePoint> = points.iter().map(|p| (p.id, p)).collect();
    let mut written = 0;
    for outcome in plan {
        let unchanged = stored.get(&outcome.point_id).is_some_and(|p| {
            p.gbro_expires_at == outcome.gbro_expires_at
                && p.expiration_type == outcome.expiration_type
                && p.is_expired == outcome.is_expired
        });
        if unchanged {
            continue;
        }
        store::set_expiration_state(
            conn,
            outcome.point_id,
            outcome.gbro_expires_at,
            outcome.expiration_type,
            outcome.is_expired,
        )?;
        written += 1;
    }
    Ok(written)
}

/// Read-only per-user GBRO rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GbroStats {
    /// Active, non-excused, GBRO-eligible points.
    pub active_eligible: usize,
    /// Points that lapsed under the behavior policy.
    pub expired_via_gbro: usize,
    /// The next behavior-based expiration at or after the reporting date,
    /// across the active set. Dates already due but not yet swept by
    /// `expire_all_pending` are not reported.
    pub next_gbro_expiry: Option<NaiveDate>,
}

/// Maintains behavior-based expiration state per user.
///
/// Triggered by every point mutation (create, update, delete, excuse,
/// un-excuse) and by the maintenance batches; always runs inside the
/// triggering operation's transaction, so a cascade never partially
/// commits.
#[derive(Clone)]
pub struct BehaviorExpirationService {
    store: Arc<PointStore>,
    policy: PolicyConfig,
}

impl BehaviorExpirationService {
    /// Creates the service over a shared store.
    pub fn new(store: Arc<PointStore>, policy: PolicyConfig) -> Self {
        Self { store, policy }
    }

    /// Full recompute of one user's GBRO timeline in its own transaction.
    pub fn cascade_recalculate(&self, user_id: i64, today: NaiveDate) -> EngineResult<usize> {
        let written = self.store.with_tx("cascade_recalculate", |tx| {
            apply_cascade(tx, &self.policy, user_id, today)
        })?;
        info!(user_id, rows_written = written, "cascade recalculated");
        Ok(written)
    }

    /// Read-only GBRO statistics for one user. No mutation.
    pub fn gbro_stats(&self, user_id: i64, today: NaiveDate) -> EngineResult<GbroStats> {
        self.store.with_conn(|conn| {
            let points = store::points_for_user(conn, user_id)?;
            let active_eligible = points
                .iter()
                .filter(|p| p.eligible_for_gbro && p.is_active())
                .count();
            let expired_via_gbro = points
                .iter()
                .filter(|p| p.is_expired && p.expiration_type == ExpirationType::Gbro)
                .count();
            let next_gbro_expiry = points
                .iter()
                .filter(|p| p.is_active())
                .filter_map(|p| p.gbro_expires_at)
                .filter(|d| *d >= today)
                .min();
            Ok(GbroStats {
                active_eligible,
                expired_via_gbro,
                next_gbro_expiry,
            })
        })
    }
}
