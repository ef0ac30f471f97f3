//! Data models exchanged with the remote API.
//!
//! - `User`: the authenticated account, passed through from the API
//! - `Credentials`: username/password submitted at login

pub mod credentials;
pub mod user;

pub use credentials::Credentials;
pub use user::User;
