//! The Stats/Aggregation Service.
//!
//! Read-only rollups over the Point Store: status breakdowns, active
//! disciplinary totals, and per-user statistics. No invariant maintenance
//! happens here; these reads tolerate concurrent cascades.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::EngineResult;
use crate::models::{AttendancePoint, ExpirationType, PointType};
use crate::store::{self, PointFilter, PointStore};

/// Sums the weights of active, non-excused points in a set.
///
/// This is the number compared against disciplinary thresholds by the
/// surrounding system. Excused and expired points carry no weight.
///
/// # Examples
///
/// ```
/// use point_engine::engine::calculate_totals;
/// use rust_decimal::Decimal;
///
/// assert_eq!(calculate_totals(&[]), Decimal::ZERO);
/// ```
pub fn calculate_totals(points: &[AttendancePoint]) -> Decimal {
    points
        .iter()
        .filter(|p| p.is_active())
        .map(|p| p.points)
        .sum()
}

/// Counts and sums grouped by excuse/expiry status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointStats {
    /// All points matching the filter.
    pub total_count: usize,
    /// Neither excused nor expired.
    pub active_count: usize,
    /// Sum of active weights.
    pub active_total: Decimal,
    /// Excused points.
    pub excused_count: usize,
    /// Expired points.
    pub expired_count: usize,
}

/// Count and weight of one point type within a user's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeBreakdown {
    /// The violation category.
    pub point_type: PointType,
    /// Points of this type.
    pub count: usize,
    /// Sum of their weights (all statuses).
    pub total: Decimal,
}

/// Count of points per governing expiration policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpirationBreakdown {
    /// The governing policy.
    pub expiration_type: ExpirationType,
    /// Points governed by it.
    pub count: usize,
}

/// Per-user rollup by point type and expiration type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserStatistics {
    /// The user the breakdown belongs to.
    pub user_id: i64,
    /// Active disciplinary total.
    pub active_total: Decimal,
    /// Per point type, omitting types the user has no points of.
    pub by_type: Vec<TypeBreakdown>,
    /// Per expiration policy.
    pub by_expiration: Vec<ExpirationBreakdown>,
}

/// Read-only aggregation over the Point Store.
#[derive(Clone)]
pub struct StatsService {
    store: Arc<PointStore>,
}

impl StatsService {
    /// Creates the service over a shared store.
    pub fn new(store: Arc<PointStore>) -> Self {
        Self { store }
    }

    /// Queries point records by filter criteria. When `scope_user` is set
    /// the filter is forced onto that user.
    pub fn list_points(
        &self,
        filter: &PointFilter,
        scope_user: Option<i64>,
    ) -> EngineResult<Vec<AttendancePoint>> {
        let mut filter = filter.clone();
        if scope_user.is_some() {
            filter.user_id = scope_user;
        }
        self.store
            .with_conn(|conn| store::query_points(conn, &filter))
    }

    /// Counts and sums points grouped by status. When `scope_user` is set
    /// the filter is forced onto that user, which is how non-privileged
    /// callers are restricted to their own data.
    pub fn calculate_stats(
        &self,
        filter: &PointFilter,
        scope_user: Option<i64>,
    ) -> EngineResult<PointStats> {
        let mut filter = filter.clone();
        if scope_user.is_some() {
            filter.user_id = scope_user;
        }
        // Status grouping happens here; a status filter in the criteria
        // would make the breakdown degenerate.
        filter.status = None;

        let points = self.store.with_conn(|conn| store::query_points(conn, &filter))?;
        Ok(PointStats {
            total_count: points.len(),
            active_count: points.iter().filter(|p| p.is_active()).count(),
            active_total: calculate_totals(&points),
            excused_count: points.iter().filter(|p| p.is_excused).count(),
            expired_count: points.iter().filter(|p| p.is_expired).count(),
        })
    }

    /// Per-user breakdown by point type and expiration type.
    pub fn user_statistics(&self, user_id: i64) -> EngineResult<UserStatistics> {
        let points = self
            .store
            .with_conn(|conn| store::points_for_user(conn, user_id))?;

        let by_type = PointType::all()
            .into_iter()
            .filter_map(|ty| {
                let of_type: Vec<&AttendancePoint> =
                    points.iter().filter(|p| p.point_type == ty).collect();
                if of_type.is_empty() {
                    return None;
                }
                Some(TypeBreakdown {
                    point_type: ty,
                    count: of_type.len(),
                    total: of_type.iter().map(|p| p.points).sum(),
                })
            })
            .collect();

        let by_expiration = [ExpirationType::None, ExpirationType::Sro, ExpirationType::Gbro]
            .into_iter()
            .map(|ty| ExpirationBreakdown {
                expiration_type: ty,
                count: points.iter().filter(|p| p.expiration_type == ty).count(),
            })
            .collect();

        Ok(UserStatistics {
            user_id,
            active_total: calculate_totals(&points),
            by_type,
            by_expiration,
        })
    }
}
