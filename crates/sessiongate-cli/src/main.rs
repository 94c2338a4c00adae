//! sessiongate - command-line front end for the session layer.
//!
//! Restores any persisted session on startup, then runs one command against
//! it: log in or out, show the session, check a navigation against the route
//! guard, or fetch a resource with the bearer token.

mod app;

use std::io;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::App;

#[derive(Parser)]
#[command(name = "sessiongate", version, about = "Log in, inspect and use a JWT session")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Exchange email and password for a session
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// Clear the session and the persisted token
    Logout,
    /// Show the current session
    Status,
    /// Run the route guard for a path and print the decision
    Visit { path: String },
    /// GET a backend resource with the session's bearer token
    Fetch { path: String },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    let cli = Cli::parse();
    info!("sessiongate starting");

    let mut app = App::new()?;

    match cli.command {
        Command::Login { email } => app.login(email).await?,
        Command::Logout => app.logout(),
        Command::Status => app.status(),
        Command::Visit { path } => app.visit(&path),
        Command::Fetch { path } => app.fetch(&path).await?,
    }

    Ok(())
}
