//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `SessionManager`: the facade the rest of the application queries
//! - `TokenLifecycle`: persisting, validating and refreshing the token pair
//! - `SessionTimeout`: the inactivity timeout / warning state machine
//! - `KeychainKey`: OS keychain storage for the token-store encryption key
//!
//! Sessions end after 30 minutes of inactivity by default, with a countdown
//! shown for the last 5.

pub mod error;
pub mod keychain;
pub mod lifecycle;
pub mod manager;
pub mod timeout;
pub mod tokens;

pub use error::SessionError;
pub use keychain::KeychainKey;
pub use lifecycle::TokenLifecycle;
pub use manager::{SessionManager, SessionManagerBuilder, SessionSnapshot};
pub use timeout::{SessionStatus, SessionTimeout, Transition};
pub use tokens::{decode_expiry, is_expired_at, time_until_expiry, TokenPair};
