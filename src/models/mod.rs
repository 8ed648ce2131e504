//! Core data models for the Attendance Point Engine.
//!
//! This module contains all the domain models used throughout the engine.

mod attendance;
mod capability;
mod point;

pub use attendance::{AttendanceOutcome, AttendanceSource, AttendanceStatus, VecAttendanceSource};
pub use capability::Capabilities;
pub use point::{AttendancePoint, ExpirationType, PointType};
