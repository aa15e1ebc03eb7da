//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod remote;
pub mod session;
pub mod telemetry;
