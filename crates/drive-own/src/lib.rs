//! Subscription lifecycle and financial ledger engine for subscribe-to-own vehicle rentals.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
