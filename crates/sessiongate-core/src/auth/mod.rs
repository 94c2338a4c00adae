//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `SessionStore`: the single owner of session state (login, logout,
//!   expiry checks, restore)
//! - `SessionRestorer`: startup hook that restores a persisted token
//! - `TokenStorage`: pluggable persistence for the access token
//! - `token`: claim decoding and expiry arithmetic
//!
//! Expiry is carried in seconds and compared in milliseconds.

pub mod restore;
pub mod session;
pub mod storage;
pub mod token;

pub use restore::SessionRestorer;
pub use session::{RestoreOutcome, Session, SessionStore, User};
pub use storage::{
    CorruptRecord, FileStorage, KeyringStorage, MemoryStorage, NoStorage, TokenStorage,
};
pub use token::{Claims, DecodeError};
