//! HTTP API module for the Attendance Point Engine.
//!
//! This module provides the REST endpoints for point entry, queries,
//! statistics, and the administrator maintenance operators.

mod handlers;
mod request;
mod response;
mod state;

pub use handlers::create_router;
pub use request::{ExcuseRequest, ExpireRequest, RegenerateRequest, ResetRequest};
pub use response::ApiError;
pub use state::AppState;
