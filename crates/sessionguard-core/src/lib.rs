//! sessionguard-core - session management for the blog admin front end.
//!
//! This crate owns the authentication token pair, decides when to refresh
//! it, enforces an inactivity timeout with a pre-expiry warning window, and
//! exposes the resulting authentication state to the rest of the application.
//!
//! The main entry point is [`SessionManager`], built with
//! [`SessionManager::builder`]. Everything it talks to (remote API, storage,
//! clock, toasts, navigation) is injected through a trait.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod events;
pub mod models;
pub mod storage;
pub mod utils;

pub use api::{ApiClient, ApiError, AuthApi, ErrorKind};
pub use auth::{
    SessionError, SessionManager, SessionSnapshot, SessionStatus, TokenLifecycle, TokenPair,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SessionConfig;
pub use events::{EventBus, Navigator, NoticeLevel, Notifier, SessionEvent, SubscriptionId};
pub use models::{Credentials, User};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StoreCipher};
