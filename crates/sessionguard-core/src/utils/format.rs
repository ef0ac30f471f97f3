use chrono::{DateTime, Utc};

use crate::auth::time_until_expiry;

/// Format a countdown as `M:SS` for a ticking display
pub fn format_countdown(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Format remaining time in words for notices, rounding up to whole minutes
/// once more than a minute is left
pub fn format_remaining(seconds: i64) -> String {
    let seconds = seconds.max(0);
    if seconds <= 60 {
        match seconds {
            1 => "1 second".to_string(),
            n => format!("{} seconds", n),
        }
    } else {
        match (seconds + 59) / 60 {
            1 => "1 minute".to_string(),
            n => format!("{} minutes", n),
        }
    }
}

/// Describe a token's lifetime for status output. Opaque tokens carry no
/// expiry claim and are reported as such.
pub fn format_token_expiry(token: &str, now: DateTime<Utc>) -> String {
    match time_until_expiry(token, now) {
        Some(left) if left.num_seconds() > 0 => {
            format!("expires in {}", format_countdown(left.num_seconds()))
        }
        Some(_) => "expired".to_string(),
        None => "no expiry claim".to_string(),
    }
}
