//! REST client module for the authentication backend.
//!
//! This module provides the `AuthGateway` seam used by the session store,
//! its HTTP implementation `ApiClient`, and the error types for login and
//! authorized requests.
//!
//! The backend issues JWT access/refresh pairs from `POST /users/token/`.

pub mod client;
pub mod error;

pub use client::{ApiClient, AuthGateway, TokenPair};
pub use error::{ApiError, AuthError};
