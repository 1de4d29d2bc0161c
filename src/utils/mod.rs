//! Utility functions and helpers
//!
//! Atomic file replacement for snapshot documents and clock arithmetic.

pub mod atomic;
pub mod time;

pub use atomic::{atomic_write, atomic_write_with, cleanup_temp_files, replace_with_backup};
pub use time::{elapsed_ms, elapsed_secs_f64};
