//! The Maintenance Service: administrator-triggered batch operators.
//!
//! Dedupe, mass-expire, GBRO backfill and repair, expiration reset, and
//! full regeneration from source attendance data. Each operator is
//! idempotent (re-running with no qualifying rows is a no-op) and
//! multi-user batches run each user's cascade as its own transaction, so
//! partial progress never leaves a single user's point set inconsistent.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::PolicyConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::{AttendanceSource, Capabilities, ExpirationType};
use crate::store::{self, ManagementCounts, PointStore};

use super::cascade::apply_cascade;
use super::creation::{CreationOutcome, CreationService};

/// Which expiration policy `expire_all_pending` should apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpireScope {
    /// Fixed-duration dates only.
    Sro,
    /// Behavior-based dates only.
    Gbro,
    /// Both policies.
    Both,
}

/// Result of a dedupe pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DedupeReport {
    /// Duplicate rows deleted.
    pub removed: usize,
    /// Users whose timelines were recascaded.
    pub users_recalculated: usize,
}

/// Result of a regeneration pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegenerateReport {
    /// Points created from attendance records.
    pub created: usize,
    /// Records skipped (already ported, unverified, or non-violating).
    pub skipped: usize,
}

/// Result of the composite cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Duplicate rows deleted.
    pub duplicates_removed: usize,
    /// Rows newly marked expired.
    pub expired: usize,
}

/// Batch operators over the Point Store.
#[derive(Clone)]
pub struct MaintenanceService {
    store: Arc<PointStore>,
    policy: PolicyConfig,
}

impl MaintenanceService {
    /// Creates the service over a shared store.
    pub fn new(store: Arc<PointStore>, policy: PolicyConfig) -> Self {
        Self { store, policy }
    }

    fn authorize(caps: &Capabilities, action: &str) -> EngineResult<()> {
        Capabilities::require(caps.run_maintenance, action)
    }

    /// Deletes legacy duplicates: for every group of points sharing a
    /// non-null attendance id, keeps the lowest-id (earliest-created) row
    /// and deletes the rest, then recascades every affected user.
    pub fn remove_duplicates(
        &self,
        caps: &Capabilities,
        today: NaiveDate,
    ) -> EngineResult<DedupeReport> {
        Self::authorize(caps, "remove duplicate points")?;

        let groups = self.store.with_conn(|conn| store::duplicate_groups(conn))?;

        // Rows to delete, grouped by the owner of each deleted row: corrupt
        // legacy groups can span users, and every owner losing a row needs
        // its own recascade.
        let mut doomed: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for group in &groups {
            for (id, user_id) in group.rows.iter().skip(1) {
                doomed.entry(*user_id).or_default().push(*id);
            }
        }

        // One transaction per affected user: deleting their duplicates and
        // recascading commit together.
        let mut removed = 0;
        for (user_id, ids) in &doomed {
            removed += self.store.with_tx("remove_duplicates", |tx| {
                for id in ids {
                    store::delete_point(tx, *id)?;
                }
                apply_cascade(tx, &self.policy, *user_id, today)?;
                Ok(ids.len())
            })?;
        }

        info!(removed, users = doomed.len(), "duplicate points removed");
        Ok(DedupeReport {
            removed,
            users_recalculated: doomed.len(),
        })
    }

    /// Marks points expired whose relevant expiration date has passed.
    /// Leaves `gbro_expires_at` values untouched; expiration and
    /// cascade-suppression are independently computed passes.
    pub fn expire_all_pending(
        &self,
        scope: ExpireScope,
        caps: &Capabilities,
        today: NaiveDate,
    ) -> EngineResult<usize> {
        Self::authorize(caps, "expire pending points")?;

        let expired = self.store.with_tx("expire_all_pending", |tx| {
            let mut expired = 0;
            if matches!(scope, ExpireScope::Gbro | ExpireScope::Both) {
                expired += store::expire_pending_gbro(tx, today)?;
            }
            if matches!(scope, ExpireScope::Sro | ExpireScope::Both) {
                expired += store::expire_pending_sro(tx, today)?;
            }
            Ok(expired)
        })?;

        info!(expired, ?scope, "pending points expired");
        Ok(expired)
    }

    /// One-time backfill: computes behavior-based dates for every eligible
    /// point that was never given one, user by user via the cascade rule.
    pub fn initialize_gbro_dates(
        &self,
        caps: &Capabilities,
        today: NaiveDate,
    ) -> EngineResult<usize> {
        Self::authorize(caps, "initialize GBRO dates")?;
        let users = self
            .store
            .with_conn(|conn| store::users_with_uninitialized_gbro(conn))?;
        self.cascade_users(&users, today, "initialize_gbro_dates")
    }

    /// Corrective pass for stale behavior-based dates (e.g., after a
    /// retroactive insert): re-derives every eligible user's timeline.
    pub fn fix_gbro_dates(&self, caps: &Capabilities, today: NaiveDate) -> EngineResult<usize> {
        Self::authorize(caps, "repair GBRO dates")?;
        let users = self
            .store
            .with_conn(|conn| store::users_with_eligible_points(conn))?;
        self.cascade_users(&users, today, "fix_gbro_dates")
    }

    fn cascade_users(
        &self,
        users: &[i64],
        today: NaiveDate,
        operation: &str,
    ) -> EngineResult<usize> {
        let mut written = 0;
        for user_id in users {
            written += self
                .store
                .with_tx(operation, |tx| apply_cascade(tx, &self.policy, *user_id, today))?;
        }
        info!(users = users.len(), rows_written = written, operation, "cascade batch finished");
        Ok(written)
    }

    /// Clears `is_expired` and restores both expiration fields to their
    /// originally computed values for the selected users (all users when
    /// no filter is given). The explicit escape from the otherwise
    /// monotonic expiration invariant, reserved for correcting
    /// administrative mistakes.
    pub fn reset_expired(
        &self,
        user_ids: Option<&[i64]>,
        caps: &Capabilities,
        today: NaiveDate,
    ) -> EngineResult<usize> {
        Self::authorize(caps, "reset expired points")?;

        let expired = self
            .store
            .with_conn(|conn| store::expired_points(conn, user_ids))?;

        let mut users: Vec<i64> = Vec::new();
        for point in &expired {
            if !users.contains(&point.user_id) {
                users.push(point.user_id);
            }
        }

        let mut reset = 0;
        for user_id in &users {
            reset += self.store.with_tx("reset_expired", |tx| {
                let mut count = 0;
                for point in expired.iter().filter(|p| p.user_id == *user_id) {
                    let mut restored = point.clone();
                    restored.is_expired = false;
                    restored.expires_at = self
                        .policy
                        .sro_expiry(restored.point_type, restored.shift_date);
                    if restored.eligible_for_gbro {
                        restored.gbro_expires_at =
                            Some(self.policy.gbro_window_end(restored.shift_date));
                        restored.expiration_type = ExpirationType::Gbro;
                    } else {
                        restored.gbro_expires_at = None;
                        restored.expiration_type = ExpirationType::None;
                    }
                    store::update_point(tx, &restored)?;
                    count += 1;
                }
                // The cascade re-derives suppression over the restored set.
                apply_cascade(tx, &self.policy, *user_id, today)?;
                Ok(count)
            })?;
        }

        info!(reset, users = users.len(), "expired points reset");
        Ok(reset)
    }

    /// Re-derives points from verified source attendance records in the
    /// range. Records that already have a point are skipped, so the pass
    /// is dedupe-by-construction and idempotent.
    pub fn regenerate_points(
        &self,
        creation: &CreationService,
        source: &dyn AttendanceSource,
        date_from: NaiveDate,
        date_to: NaiveDate,
        user_id: Option<i64>,
        caps: &Capabilities,
        today: NaiveDate,
    ) -> EngineResult<RegenerateReport> {
        Self::authorize(caps, "regenerate points")?;
        if date_to < date_from {
            return Err(EngineError::Validation {
                field: "date_to".to_string(),
                message: "range end before start".to_string(),
            });
        }

        let records = source.verified_in_range(date_from, date_to, user_id)?;
        let mut report = RegenerateReport {
            created: 0,
            skipped: 0,
        };
        for record in &records {
            match creation.create_from_attendance(record, today)? {
                CreationOutcome::Created(_) => report.created += 1,
                CreationOutcome::Skipped(_) => report.skipped += 1,
            }
        }

        info!(
            created = report.created,
            skipped = report.skipped,
            "points regenerated from attendance data"
        );
        Ok(report)
    }

    /// Composite pass: dedupe, then expire everything pending under both
    /// policies.
    pub fn cleanup(&self, caps: &Capabilities, today: NaiveDate) -> EngineResult<CleanupReport> {
        let dedupe = self.remove_duplicates(caps, today)?;
        let expired = self.expire_all_pending(ExpireScope::Both, caps, today)?;
        Ok(CleanupReport {
            duplicates_removed: dedupe.removed,
            expired,
        })
    }

    /// Aggregate health metrics for operational dashboards.
    pub fn management_stats(&self, caps: &Capabilities) -> EngineResult<ManagementCounts> {
        Self::authorize(caps, "view management statistics")?;
        self.store.with_conn(store::management_counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::notifier::NullNotifier;
    use crate::models::{AttendanceOutcome, AttendanceStatus, PointType, VecAttendanceSource};
    use crate::store::{NewPoint, points_for_user};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn seed(user_id: i64, attendance_id: Option<i64>, shift: &str) -> NewPoint {
        let policy = PolicyConfig::default();
        let shift_date = date(shift);
        NewPoint {
            user_id,
            attendance_id,
            shift_date,
            point_type: PointType::Tardy,
            points: policy.weight_for(PointType::Tardy),
            is_manual: attendance_id.is_none(),
            is_advised: false,
            status: "tardy".to_string(),
            expires_at: policy.sro_expiry(PointType::Tardy, shift_date),
            eligible_for_gbro: true,
            gbro_expires_at: Some(policy.gbro_window_end(shift_date)),
            expiration_type: ExpirationType::Gbro,
            tardy_minutes: Some(5),
            undertime_minutes: None,
            violation_details: String::new(),
            notes: None,
            created_by: None,
            created_at: shift_date.and_hms_opt(8, 0, 0).unwrap(),
        }
    }

    fn services() -> (MaintenanceService, CreationService, Arc<PointStore>) {
        let store = Arc::new(PointStore::open_in_memory().unwrap());
        let policy = PolicyConfig::default();
        let maintenance = MaintenanceService::new(store.clone(), policy.clone());
        let creation = CreationService::new(store.clone(), policy, Arc::new(NullNotifier));
        (maintenance, creation, store)
    }

    #[test]
    fn test_remove_duplicates_keeps_lowest_id_and_cascades_once() {
        // Attendance id 77 ends up owned by point ids 5 and 9.
        let (maintenance, _, store) = services();
        store
            .with_tx("seed", |tx| {
                for _ in 0..4 {
                    store::insert_point(tx, &seed(99, None, "2023-01-01"))?;
                }
                store::insert_point(tx, &seed(10, Some(77), "2024-01-10"))?; // id 5
                store::insert_point(tx, &seed(10, None, "2024-01-11"))?; // id 6
                store::insert_point(tx, &seed(10, Some(12), "2024-01-12"))?; // id 7
                store::insert_point(tx, &seed(10, None, "2024-01-13"))?; // id 8
                store::insert_point(tx, &seed(10, Some(77), "2024-01-10"))?; // id 9
                Ok(())
            })
            .unwrap();

        let report = maintenance
            .remove_duplicates(&Capabilities::admin(), date("2024-02-01"))
            .unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.users_recalculated, 1);

        let points = store.with_conn(|c| points_for_user(c, 10)).unwrap();
        let ids: Vec<i64> = points.iter().map(|p| p.id).collect();
        assert!(ids.contains(&5), "lowest id kept");
        assert!(!ids.contains(&9), "higher id deleted");

        // Idempotent: nothing left to remove.
        let report = maintenance
            .remove_duplicates(&Capabilities::admin(), date("2024-02-01"))
            .unwrap();
        assert_eq!(report.removed, 0);
        assert_eq!(report.users_recalculated, 0);
    }

    #[test]
    fn test_remove_duplicates_recascades_the_owner_of_each_deleted_row() {
        // A corrupt legacy group where attendance id 77 is shared across
        // two users. The kept row belongs to user 10; the deleted row
        // belongs to user 20, whose timeline must be the one recascaded.
        let (maintenance, _, store) = services();
        store
            .with_tx("seed", |tx| {
                store::insert_point(tx, &seed(10, Some(77), "2024-01-10"))?; // id 1, kept
                let mut suppressed = seed(20, Some(88), "2024-01-01"); // id 2
                suppressed.gbro_expires_at = None;
                suppressed.expiration_type = ExpirationType::Sro;
                store::insert_point(tx, &suppressed)?;
                store::insert_point(tx, &seed(20, Some(77), "2024-02-15"))?; // id 3, deleted
                Ok(())
            })
            .unwrap();

        let report = maintenance
            .remove_duplicates(&Capabilities::admin(), date("2024-02-20"))
            .unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.users_recalculated, 1, "only user 20 lost a row");

        // Deleting the interrupter reopens user 20's earlier window.
        let points = store.with_conn(|c| points_for_user(c, 20)).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].id, 2);
        assert_eq!(points[0].gbro_expires_at, Some(date("2024-03-01")));
        assert_eq!(points[0].expiration_type, ExpirationType::Gbro);

        // User 10 keeps its row untouched.
        let points = store.with_conn(|c| points_for_user(c, 10)).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].id, 1);
    }

    #[test]
    fn test_expire_all_pending_scopes() {
        let (maintenance, _, store) = services();
        store
            .with_tx("seed", |tx| {
                // SRO long past, GBRO also past.
                store::insert_point(tx, &seed(10, Some(1), "2023-01-01"))?;
                // Only the GBRO date has passed.
                store::insert_point(tx, &seed(10, Some(2), "2024-01-01"))?;
                // Nothing has passed.
                store::insert_point(tx, &seed(10, Some(3), "2024-03-20"))?;
                Ok(())
            })
            .unwrap();
        let today = date("2024-03-25");

        let expired = maintenance
            .expire_all_pending(ExpireScope::Sro, &Capabilities::admin(), today)
            .unwrap();
        assert_eq!(expired, 1);

        let expired = maintenance
            .expire_all_pending(ExpireScope::Gbro, &Capabilities::admin(), today)
            .unwrap();
        assert_eq!(expired, 1);

        // Re-running with nothing pending is a no-op.
        let expired = maintenance
            .expire_all_pending(ExpireScope::Both, &Capabilities::admin(), today)
            .unwrap();
        assert_eq!(expired, 0);

        let points = store.with_conn(|c| points_for_user(c, 10)).unwrap();
        assert!(points[0].is_expired);
        assert!(points[1].is_expired);
        assert_eq!(points[1].expiration_type, ExpirationType::Gbro);
        assert!(!points[2].is_expired);
        // gbro_expires_at values themselves are untouched.
        assert!(points[0].gbro_expires_at.is_some());
    }

    #[test]
    fn test_initialize_gbro_dates_backfills_null_dates() {
        let (maintenance, _, store) = services();
        store
            .with_tx("seed", |tx| {
                let mut row = seed(10, Some(1), "2024-01-01");
                row.gbro_expires_at = None; // legacy row, never computed
                store::insert_point(tx, &row)?;
                Ok(())
            })
            .unwrap();

        let written = maintenance
            .initialize_gbro_dates(&Capabilities::admin(), date("2024-01-15"))
            .unwrap();
        assert_eq!(written, 1);

        let points = store.with_conn(|c| points_for_user(c, 10)).unwrap();
        assert_eq!(points[0].gbro_expires_at, Some(date("2024-03-01")));

        // Idempotent once initialized.
        let written = maintenance
            .initialize_gbro_dates(&Capabilities::admin(), date("2024-01-15"))
            .unwrap();
        assert_eq!(written, 0);
    }

    #[test]
    fn test_fix_gbro_dates_repairs_stale_state() {
        let (maintenance, _, store) = services();
        store
            .with_tx("seed", |tx| {
                // Retroactive state: the second point should suppress the
                // first, but the stored dates predate it.
                store::insert_point(tx, &seed(10, Some(1), "2024-01-01"))?;
                store::insert_point(tx, &seed(10, Some(2), "2024-02-15"))?;
                Ok(())
            })
            .unwrap();

        maintenance
            .fix_gbro_dates(&Capabilities::admin(), date("2024-02-20"))
            .unwrap();

        let points = store.with_conn(|c| points_for_user(c, 10)).unwrap();
        assert_eq!(points[0].gbro_expires_at, None, "suppressed after repair");
        assert_eq!(points[1].gbro_expires_at, Some(date("2024-04-15")));
    }

    #[test]
    fn test_reset_expired_restores_original_dates() {
        let (maintenance, _, store) = services();
        store
            .with_tx("seed", |tx| {
                store::insert_point(tx, &seed(10, Some(1), "2023-01-01"))?;
                Ok(())
            })
            .unwrap();
        let today = date("2024-01-10");
        maintenance
            .expire_all_pending(ExpireScope::Both, &Capabilities::admin(), today)
            .unwrap();
        let points = store.with_conn(|c| points_for_user(c, 10)).unwrap();
        assert!(points[0].is_expired);

        let reset = maintenance
            .reset_expired(Some(&[10]), &Capabilities::admin(), date("2023-02-01"))
            .unwrap();
        assert_eq!(reset, 1);

        let points = store.with_conn(|c| points_for_user(c, 10)).unwrap();
        assert!(!points[0].is_expired);
        assert_eq!(points[0].expires_at, date("2023-07-01"));
        assert_eq!(points[0].gbro_expires_at, Some(date("2023-03-02")));
        assert_eq!(points[0].expiration_type, ExpirationType::Gbro);
    }

    #[test]
    fn test_reset_expired_ignores_other_users() {
        let (maintenance, _, store) = services();
        store
            .with_tx("seed", |tx| {
                store::insert_point(tx, &seed(10, Some(1), "2023-01-01"))?;
                store::insert_point(tx, &seed(11, Some(2), "2023-01-01"))?;
                Ok(())
            })
            .unwrap();
        maintenance
            .expire_all_pending(ExpireScope::Both, &Capabilities::admin(), date("2024-01-10"))
            .unwrap();

        let reset = maintenance
            .reset_expired(Some(&[10]), &Capabilities::admin(), date("2023-02-01"))
            .unwrap();
        assert_eq!(reset, 1);
        let other = store.with_conn(|c| points_for_user(c, 11)).unwrap();
        assert!(other[0].is_expired, "unselected user untouched");
    }

    #[test]
    fn test_regenerate_points_skips_ported_rows() {
        let (maintenance, creation, store) = services();
        let today = date("2024-02-01");
        let records = vec![
            AttendanceOutcome {
                id: 1,
                user_id: 10,
                shift_date: date("2024-01-05"),
                status: AttendanceStatus::Tardy,
                is_advised: false,
                tardy_minutes: Some(9),
                undertime_minutes: None,
                admin_verified: true,
            },
            AttendanceOutcome {
                id: 2,
                user_id: 10,
                shift_date: date("2024-01-06"),
                status: AttendanceStatus::Present,
                is_advised: false,
                tardy_minutes: None,
                undertime_minutes: None,
                admin_verified: true,
            },
        ];
        // Port record 1 ahead of time; regeneration must skip it.
        creation
            .create_from_attendance(&records[0], today)
            .unwrap();

        let source = VecAttendanceSource::new(records);
        let report = maintenance
            .regenerate_points(
                &creation,
                &source,
                date("2024-01-01"),
                date("2024-01-31"),
                None,
                &Capabilities::admin(),
                today,
            )
            .unwrap();
        assert_eq!(report.created, 0);
        assert_eq!(report.skipped, 2);

        let points = store.with_conn(|c| points_for_user(c, 10)).unwrap();
        assert_eq!(points.len(), 1);
    }

    #[test]
    fn test_regenerate_points_rejects_inverted_range() {
        let (maintenance, creation, _) = services();
        let source = VecAttendanceSource::new(vec![]);
        let err = maintenance
            .regenerate_points(
                &creation,
                &source,
                date("2024-02-01"),
                date("2024-01-01"),
                None,
                &Capabilities::admin(),
                date("2024-02-01"),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }

    #[test]
    fn test_cleanup_composes_dedupe_and_expire() {
        let (maintenance, _, _) = services();
        let report = maintenance
            .cleanup(&Capabilities::admin(), date("2024-01-01"))
            .unwrap();
        assert_eq!(report.duplicates_removed, 0);
        assert_eq!(report.expired, 0);
    }

    #[test]
    fn test_maintenance_requires_capability() {
        let (maintenance, _, _) = services();
        let err = maintenance
            .remove_duplicates(&Capabilities::hr(), date("2024-01-01"))
            .unwrap_err();
        assert!(matches!(err, EngineError::Authorization { .. }));
        let err = maintenance
            .management_stats(&Capabilities::employee())
            .unwrap_err();
        assert!(matches!(err, EngineError::Authorization { .. }));
    }

    #[test]
    fn test_management_stats_counts_suppressed_windows() {
        let (maintenance, creation, _) = services();
        let today = date("2024-02-20");
        for (id, shift) in [(1, "2024-01-01"), (2, "2024-02-15")] {
            creation
                .create_from_attendance(
                    &AttendanceOutcome {
                        id,
                        user_id: 10,
                        shift_date: date(shift),
                        status: AttendanceStatus::Tardy,
                        is_advised: false,
                        tardy_minutes: Some(5),
                        undertime_minutes: None,
                        admin_verified: true,
                    },
                    today,
                )
                .unwrap();
        }

        let stats = maintenance.management_stats(&Capabilities::admin()).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.suppressed_gbro, 1);
    }
}
