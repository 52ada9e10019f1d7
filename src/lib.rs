//! Core library for the `loadcore` daemon.
//!
//! This crate provides the building blocks used by the binary: domain
//! types, the event loop and load strategies, the embedded script
//! sandbox, metrics aggregation, SQLite-backed persistence, and the
//! loopback HTTP control surface. The primary user-facing interface is
//! the `loadcore` daemon process; library APIs may evolve as the
//! control surface grows.
pub mod args;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod eventloop;
pub mod logger;
pub mod metrics;
pub mod persistence;
pub mod pidlock;
pub mod queue;
pub mod script;
pub mod shutdown;
pub mod strategy;
pub mod time;
pub mod transport;
pub mod variables;
