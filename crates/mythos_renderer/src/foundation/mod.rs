//! Foundation module - shared utilities
//!
//! - Math types and camera helpers
//! - Logging sink and initialization

pub mod logging;
pub mod math;
