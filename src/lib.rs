//! Payment approval workflow with verification tokens and an immutable audit log.
//!
//! - [`domain`]: payments, actors, audit rows and the storage ports
//! - [`application`]: the state machine, token service, audit log, permission
//!   gate and public verification endpoint
//! - [`infrastructure`]: in-memory and RocksDB adapters
//! - [`interfaces`]: the axum HTTP surface

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
