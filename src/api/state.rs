//! Application state for the Attendance Point Engine API.
//!
//! This module defines the shared application state that is available
//! to all request handlers.

use std::sync::Arc;

use crate::config::PolicyConfig;
use crate::engine::{
    BehaviorExpirationService, CreationService, MaintenanceService, Notifier, StatsService,
};
use crate::store::PointStore;

/// Shared application state.
///
/// Contains the engine services, all built over one shared Point Store
/// and one policy configuration.
#[derive(Clone)]
pub struct AppState {
    creation: CreationService,
    expiration: BehaviorExpirationService,
    stats: StatsService,
    maintenance: MaintenanceService,
}

impl AppState {
    /// Creates the application state over a shared store and policy.
    pub fn new(store: Arc<PointStore>, policy: PolicyConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            creation: CreationService::new(store.clone(), policy.clone(), notifier),
            expiration: BehaviorExpirationService::new(store.clone(), policy.clone()),
            stats: StatsService::new(store.clone()),
            maintenance: MaintenanceService::new(store, policy),
        }
    }

    /// The point creation/excuse service.
    pub fn creation(&self) -> &CreationService {
        &self.creation
    }

    /// The behavior-expiration service.
    pub fn expiration(&self) -> &BehaviorExpirationService {
        &self.expiration
    }

    /// The read-only statistics service.
    pub fn stats(&self) -> &StatsService {
        &self.stats
    }

    /// The maintenance batch operators.
    pub fn maintenance(&self) -> &MaintenanceService {
        &self.maintenance
    }
}
