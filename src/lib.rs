//! Attendance Point Engine for the HR portal
//!
//! This crate accrues disciplinary points from verified attendance records,
//! maintains their two expiration tracks (a fixed-duration date and a
//! behavior-based "good behavior roll-off" window), and exposes queries,
//! statistics, and maintenance batch operators over a REST API.

#![warn(missing_docs)]

pub mod api;
pub mod classification;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod store;
