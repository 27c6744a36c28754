//! Process plumbing: arguments, configuration, logging, startup and shutdown

pub mod args;
pub mod autosave;
pub mod commands;
pub mod config;
pub mod log;
pub mod rt;
pub mod shutdown;

pub use log::{init_logging_no_file, init_logging_with_file};
