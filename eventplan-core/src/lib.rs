//! Core shared library for the event planning services.
//!
//! This crate exposes the primitives every service depends on: the canonical
//! error type, configuration loading, the database pool, the clock used for
//! time-of-day computations and logging setup.

pub mod clock;
pub mod config;
pub mod db;
pub mod errors;
pub mod logging;
pub mod serde_utils;

pub use clock::{Clock, FixedClock, SystemClock};
pub use errors::{PlannerError, Result as CoreResult};
