//! Error types for the Attendance Point Engine.
//!
//! This module provides strongly-typed errors using the `thiserror` crate
//! for all error conditions that can occur while accruing, excusing, or
//! expiring attendance points.

use thiserror::Error;

/// The main error type for the Attendance Point Engine.
///
/// All operations in the engine return this error type, making it easy
/// to handle errors consistently throughout the application.
///
/// # Example
///
/// ```
/// use point_engine::error::EngineError;
///
/// let error = EngineError::ImmutableRecord { point_id: 42 };
/// assert_eq!(
///     error.to_string(),
///     "Point 42 is system-generated and cannot be modified through this path"
/// );
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input to a create/update/maintenance call, rejected before
    /// any transaction opens.
    #[error("Validation failed for '{field}': {message}")]
    Validation {
        /// The input field that failed validation.
        field: String,
        /// A description of what made the input invalid.
        message: String,
    },

    /// The caller lacks the capability required for the operation.
    #[error("Not authorized to {action}")]
    Authorization {
        /// The action the caller attempted.
        action: String,
    },

    /// Attempt to update or delete a system-generated (non-manual) point.
    #[error("Point {point_id} is system-generated and cannot be modified through this path")]
    ImmutableRecord {
        /// The id of the point that was targeted.
        point_id: i64,
    },

    /// A referenced point, user, or attendance record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity that was looked up.
        entity: String,
        /// The id that was not found.
        id: i64,
    },

    /// A cascade recomputation could not complete atomically. The enclosing
    /// transaction is rolled back; no partial expiration-date writes are
    /// ever visible.
    #[error("Consistency failure during {operation}: {message}")]
    Consistency {
        /// The operation whose cascade failed.
        operation: String,
        /// A description of the failure.
        message: String,
    },

    /// Policy configuration file was not found at the specified path.
    #[error("Policy configuration not found: {path}")]
    ConfigNotFound {
        /// The path that was not found.
        path: String,
    },

    /// Policy configuration file could not be parsed.
    #[error("Failed to parse policy configuration '{path}': {message}")]
    ConfigParse {
        /// The path to the file that failed to parse.
        path: String,
        /// A description of the parse error.
        message: String,
    },

    /// The point store failed to read or write.
    #[error("Storage error: {message}")]
    Storage {
        /// A description of the storage failure.
        message: String,
    },
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => EngineError::NotFound {
                entity: "Row".to_string(),
                id: 0,
            },
            other => EngineError::Storage {
                message: other.to_string(),
            },
        }
    }
}

/// A type alias for Results that return EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_displays_field_and_message() {
        let error = EngineError::Validation {
            field: "date_to".to_string(),
            message: "range end before start".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Validation failed for 'date_to': range end before start"
        );
    }

    #[test]
    fn test_authorization_displays_action() {
        let error = EngineError::Authorization {
            action: "excuse points".to_string(),
        };
        assert_eq!(error.to_string(), "Not authorized to excuse points");
    }

    #[test]
    fn test_immutable_record_displays_point_id() {
        let error = EngineError::ImmutableRecord { point_id: 7 };
        assert_eq!(
            error.to_string(),
            "Point 7 is system-generated and cannot be modified through this path"
        );
    }

    #[test]
    fn test_not_found_displays_entity_and_id() {
        let error = EngineError::NotFound {
            entity: "Point".to_string(),
            id: 99,
        };
        assert_eq!(error.to_string(), "Point not found: 99");
    }

    #[test]
    fn test_consistency_displays_operation() {
        let error = EngineError::Consistency {
            operation: "cascade_recalculate".to_string(),
            message: "row vanished mid-pass".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Consistency failure during cascade_recalculate: row vanished mid-pass"
        );
    }

    #[test]
    fn test_config_not_found_displays_path() {
        let error = EngineError::ConfigNotFound {
            path: "/missing/policy.yaml".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Policy configuration not found: /missing/policy.yaml"
        );
    }

    #[test]
    fn test_sqlite_error_maps_to_storage() {
        let err: EngineError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, EngineError::Storage { .. }));
    }

    #[test]
    fn test_no_rows_maps_to_not_found() {
        let err: EngineError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn test_errors_implement_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<EngineError>();
    }

    #[test]
    fn test_error_propagation_with_question_mark() {
        fn returns_not_found() -> EngineResult<()> {
            Err(EngineError::NotFound {
                entity: "Point".to_string(),
                id: 1,
            })
        }

        fn propagates_error() -> EngineResult<()> {
            returns_not_found()?;
            Ok(())
        }

        assert!(propagates_error().is_err());
    }
}
