//! Taskwire — typed task dispatch to local and remote workers.

pub mod config;
pub mod error;
pub mod files;
pub mod peer;
pub mod protocol;
pub mod queue;
pub mod tasks;
pub mod worker;
