//! Application composition for the sessiongate CLI.
//!
//! `App` owns the configuration and the one `SessionStore` of the process,
//! and hands shared handles of the store to the restorer and the route guard.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use sessiongate_core::{
    ApiClient, Config, RestoreOutcome, RouteGuard, SessionRestorer, SessionStore,
};

pub struct App {
    pub config: Config,
    pub store: Arc<SessionStore>,
    api: ApiClient,
    guard: RouteGuard,
}

impl App {
    /// Build the store from config and restore any persisted session
    pub fn new() -> Result<Self> {
        let mut config = match Config::load() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to load config, using defaults");
                Config::default()
            }
        };
        config.apply_env();
        debug!(api_base_url = %config.api_base_url, persistence = ?config.persistence, "Config loaded");

        let api = ApiClient::new(config.api_base_url.clone())?;
        let storage = config.token_storage()?;
        let store = Arc::new(SessionStore::new(
            Arc::new(api.clone()),
            storage,
            config.production,
        ));

        let outcome = SessionRestorer::new(store.clone()).run();
        if outcome == RestoreOutcome::Restored {
            info!("Resumed previous session");
        }

        let guard = RouteGuard::new(store.clone());

        Ok(Self {
            config,
            store,
            api,
            guard,
        })
    }

    // =========================================================================
    // Commands
    // =========================================================================

    pub async fn login(&mut self, email: Option<String>) -> Result<()> {
        let email = match email {
            Some(email) => email,
            None => Self::prompt_email(self.config.last_email.as_deref())?,
        };
        if email.is_empty() {
            return Err(anyhow::anyhow!("Email is required"));
        }
        let password = rpassword::prompt_password("Password: ")?;

        // AuthError displays as the user-facing message
        if let Err(e) = self.store.login(&email, &password).await {
            return Err(anyhow::anyhow!("{}", e));
        }

        self.config.last_email = Some(email);
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }

        match self.store.user() {
            Some(user) => println!("Logged in as {} (id {})", user.email, user.id),
            None => println!("Logged in"),
        }
        Ok(())
    }

    pub fn logout(&self) {
        self.store.logout();
        println!("Logged out");
    }

    pub fn status(&self) {
        if !self.store.is_logged_in() {
            println!("Not logged in");
            return;
        }
        if let Some(user) = self.store.user() {
            println!("User:    {} (id {})", user.email, user.id);
        }
        match self.store.expires_at() {
            Some(exp) => println!("Expires: {}", format_expiry(exp)),
            None => println!("Expires: never"),
        }
    }

    pub fn visit(&self, path: &str) {
        let navigation = self.config.routes.resolve(path);
        let decision = self.guard.before_each(&navigation);
        match decision.location(&self.config.routes) {
            Some(location) => println!("redirect {}", location),
            None => println!("allow {}", path),
        }
    }

    pub async fn fetch(&self, path: &str) -> Result<()> {
        if !self.store.is_logged_in() {
            return Err(anyhow::anyhow!("Not logged in"));
        }
        let authorization = self
            .store
            .authorization_header()
            .ok_or_else(|| anyhow::anyhow!("Not logged in"))?;
        let body: serde_json::Value = self
            .api
            .with_authorization(authorization)
            .get_json(path)
            .await?;
        println!("{}", serde_json::to_string_pretty(&body)?);
        Ok(())
    }

    fn prompt_email(last_email: Option<&str>) -> Result<String> {
        match last_email {
            Some(last) => print!("Email [{}]: ", last),
            None => print!("Email: "),
        }
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin()
            .read_line(&mut input)
            .context("Failed to read email")?;
        let input = input.trim();

        Ok(match (input.is_empty(), last_email) {
            (true, Some(last)) => last.to_string(),
            _ => input.to_string(),
        })
    }
}

/// Render an expiry in seconds since the epoch for display
pub fn format_expiry(exp: i64) -> String {
    match DateTime::<Utc>::from_timestamp(exp, 0) {
        Some(at) => {
            let now = Utc::now();
            if at <= now {
                format!("{} (expired)", at.format("%Y-%m-%d %H:%M:%S UTC"))
            } else {
                let minutes = (at - now).num_minutes();
                format!("{} (in {}m)", at.format("%Y-%m-%d %H:%M:%S UTC"), minutes)
            }
        }
        None => format!("{} (out of range)", exp),
    }
}

// ============================================================================
// Tests
// ============================================================================
