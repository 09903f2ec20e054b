//! Task and workflow state engine for an external agent driver.
//!
//! The driver calls one operation per process invocation; every operation
//! loads what it needs from `.flow/`, applies the rules and persists the
//! result. The crate keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (task and phase state machines,
//!   selection, batch validation, circuit breaker, retry policy, record codec).
//! - **[`io`]**: Everything that touches disk or time, behind the
//!   [`io::fs::FileSystem`] and [`io::clock::Clock`] ports.
//!
//! Orchestration modules ([`tasks`], [`state`], [`heal`]) combine the two
//! through a borrowed [`workspace::Workspace`].

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod heal;
pub mod io;
pub mod logging;
pub mod state;
pub mod tasks;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workspace;
