//! Core library for sessiongate.
//!
//! Holds everything that is not presentation: the auth gateway client, the
//! token codec, persisted token storage, the session store with its startup
//! restorer, the route guard, and configuration.

pub mod api;
pub mod auth;
pub mod config;
pub mod routes;

pub use api::{ApiClient, AuthError, AuthGateway, TokenPair};
pub use auth::{
    Claims, DecodeError, RestoreOutcome, Session, SessionRestorer, SessionStore, TokenStorage,
    User,
};
pub use config::{Config, Persistence};
pub use routes::{NavigationDecision, Route, RouteGuard, RouteTable};
