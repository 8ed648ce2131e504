//! Capability checks for point operations.
//!
//! Call sites pass an explicit [`Capabilities`] value into each operation
//! instead of re-deriving permissions from role strings ad hoc.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// The set of actions a caller is allowed to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Create, update, and delete manual points.
    pub manage_points: bool,
    /// Excuse and un-excuse points.
    pub excuse_points: bool,
    /// Run maintenance batches (dedupe, mass-expire, reset, regenerate).
    pub run_maintenance: bool,
    /// View points and statistics of any user, not only the caller's own.
    pub view_all: bool,
}

impl Capabilities {
    /// Full capability set.
    pub fn admin() -> Self {
        Self {
            manage_points: true,
            excuse_points: true,
            run_maintenance: true,
            view_all: true,
        }
    }

    /// HR staff: manage and excuse points, view everything, but no
    /// maintenance batches.
    pub fn hr() -> Self {
        Self {
            manage_points: true,
            excuse_points: true,
            run_maintenance: false,
            view_all: true,
        }
    }

    /// Regular employee: read-only access to their own data.
    pub fn employee() -> Self {
        Self {
            manage_points: false,
            excuse_points: false,
            run_maintenance: false,
            view_all: false,
        }
    }

    /// Maps a portal role name onto a capability set. Unknown roles get
    /// the employee (least-privilege) set.
    pub fn from_role(role: &str) -> Self {
        match role {
            "admin" => Self::admin(),
            "hr" => Self::hr(),
            _ => Self::employee(),
        }
    }

    /// Fails with an authorization error unless `allowed` holds.
    pub fn require(allowed: bool, action: &str) -> EngineResult<()> {
        if allowed {
            Ok(())
        } else {
            Err(EngineError::Authorization {
                action: action.to_string(),
            })
        }
    }
}
