//! Request types for the Attendance Point Engine API.
//!
//! Point creation and update bodies reuse the engine's own payload types
//! ([`crate::engine::ManualPointPayload`], [`crate::engine::ManualPointUpdate`],
//! [`crate::models::AttendanceOutcome`]); this module defines the bodies
//! that exist only at the HTTP surface.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::engine::ExpireScope;
use crate::models::AttendanceOutcome;

/// Request body for `POST /points/{id}/excuse`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcuseRequest {
    /// Why the point is being excused.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Request body for `POST /maintenance/expire`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpireRequest {
    /// Which expiration policy to apply.
    #[serde(default = "default_scope")]
    pub scope: ExpireScope,
}

fn default_scope() -> ExpireScope {
    ExpireScope::Both
}

/// Request body for `POST /maintenance/reset`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResetRequest {
    /// Restrict the reset to these users; all users when omitted.
    #[serde(default)]
    pub user_ids: Option<Vec<i64>>,
}

/// Request body for `POST /maintenance/regenerate`.
///
/// Carries the batch of source attendance records inline; the engine
/// itself has no connection to the attendance system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegenerateRequest {
    /// Earliest shift date, inclusive.
    pub date_from: NaiveDate,
    /// Latest shift date, inclusive.
    pub date_to: NaiveDate,
    /// Restrict to one user.
    #[serde(default)]
    pub user_id: Option<i64>,
    /// The attendance records to derive points from.
    pub records: Vec<AttendanceOutcome>,
}
