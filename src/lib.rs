//! Ark Kubernetes Operator
//!
//! This operator backs up cluster resources and persistent volume snapshots
//! to object storage and restores them, driven by `Backup` and `Restore`
//! custom resources.

pub mod artifact;
pub mod backup;
pub mod client;
pub mod clock;
pub mod cloudprovider;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod discovery;
pub mod error;
pub mod filters;
pub mod metrics;
pub mod patch;
pub mod plugin;
pub mod reconcilers;
pub mod restore;
pub mod workqueue;

pub use error::{Error, Result};
