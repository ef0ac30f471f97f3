//! REST API client module for the blog's authentication endpoints.
//!
//! This module provides the `AuthApi` trait, its `reqwest`-backed
//! `ApiClient` implementation, and the `ApiError` taxonomy every failure is
//! classified into.
//!
//! The API issues JWT access/refresh token pairs from `POST /login` and
//! `POST /refresh`.

pub mod client;
pub mod error;
pub mod retry;

pub use client::{ApiClient, AuthApi, LoginResponse, RefreshResponse};
pub use error::{ApiError, ErrorKind};
pub use retry::{with_backoff, RetryPolicy, Retryable};
