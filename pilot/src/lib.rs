//! Reactive GUI-automation task engine.
//!
//! A task is an ordered, mutable list of steps driven against a live desktop
//! application. Each step is dispatched to perception (screenshot plus a
//! vision model), actuation (pointer and keyboard) or planning; the vision
//! model may suggest follow-up steps, which are spliced in right after the
//! step that produced them.
//!
//! - **[`core`]**: Pure, deterministic logic (task store, step actions,
//!   suggestion parsing). No I/O.
//! - **[`io`]**: Side-effecting adapters (config, prompts, HTTP client,
//!   desktop commands), each behind a trait so tests can script them.
//!
//! [`dispatch`], [`orchestrator`] and [`bootstrap`] coordinate the two.

pub mod bootstrap;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
