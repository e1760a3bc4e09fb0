//! Utility functions for display formatting.

pub mod format;

pub use format::{format_remaining, format_session_left, truncate_string};
