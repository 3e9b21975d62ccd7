//! Deterministic, pure logic shared by the task engine.
//!
//! Core modules are free of I/O side effects. They operate on in-memory
//! records and return deterministic outputs suitable for tests; the only
//! async piece is the call budget, which just wraps a future in a timer.

pub mod action;
pub mod budget;
pub mod expansion;
pub mod invariants;
pub mod params;
pub mod task_store;
pub mod types;
