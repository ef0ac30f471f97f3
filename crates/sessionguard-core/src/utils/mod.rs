//! Utility functions for formatting session timings.

pub mod format;

pub use format::{format_countdown, format_remaining, format_token_expiry};
