//! Policy configuration loading.
//!
//! Loads the attendance-point policy from a YAML file. The engine also
//! runs without a file via [`PolicyConfig::default`], which carries the
//! organization's current thresholds.

use std::fs;
use std::path::Path;

use crate::error::{EngineError, EngineResult};

use super::types::PolicyConfig;

impl PolicyConfig {
    /// Loads the policy from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConfigNotFound`] when the file does not exist
    /// and [`EngineError::ConfigParse`] when it is not valid policy YAML.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use point_engine::config::PolicyConfig;
    ///
    /// let policy = PolicyConfig::load("./config/policy.yaml").unwrap();
    /// assert_eq!(policy.gbro_window_days, 60);
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EngineError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = fs::read_to_string(path).map_err(|e| EngineError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        serde_yaml::from_str(&contents).map_err(|e| EngineError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}
