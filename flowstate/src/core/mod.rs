//! Deterministic, pure logic shared by the services.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and take the current time as an argument, so every
//! outcome is reproducible in tests.

pub mod batch;
pub mod breaker;
pub mod index;
pub mod phase;
pub mod query;
pub mod record;
pub mod retry;
pub mod task;
