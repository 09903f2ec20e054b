//! Side-effecting adapters: the filesystem port, clock and the stores
//! that persist `.flow/` documents.

pub mod breaker_store;
pub mod clock;
pub mod config;
pub mod event_log;
pub mod fs;
pub mod index_store;
pub mod init;
pub mod state_store;
pub mod task_store;
