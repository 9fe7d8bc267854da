//! Prometheus metrics for the Ark operator
//!
//! Exposes backup, restore and sync counters plus the health endpoints.

mod prometheus;

pub use prometheus::*;
