//! Engine services for the Point Engine.
//!
//! This module contains the stateful services built over the Point Store:
//! point creation from verified attendance data and manual entry, the
//! behavior-based expiration cascade, read-only statistics rollups, and
//! the administrator-triggered maintenance batch operators.

mod cascade;
mod creation;
mod maintenance;
mod notifier;
mod stats;

pub use cascade::{BehaviorExpirationService, GbroOutcome, GbroStats, plan_cascade};
pub use creation::{
    CreationOutcome, CreationService, ManualPointPayload, ManualPointUpdate, SkipReason,
};
pub use maintenance::{
    CleanupReport, DedupeReport, ExpireScope, MaintenanceService, RegenerateReport,
};
pub use notifier::{Notifier, NullNotifier};
pub use stats::{
    ExpirationBreakdown, PointStats, StatsService, TypeBreakdown, UserStatistics,
    calculate_totals,
};
