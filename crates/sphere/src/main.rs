//! sphere - SocialSphere terminal client
//!
//! Account management commands plus an interactive shell with live
//! notifications, presence and chat.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cli;
mod commands;
mod config;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("sphere=info".parse()?))
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = config::Config::load()?;

    // Execute command
    match cli.command {
        Commands::Register { username, email } => {
            commands::auth::register(&username, &email, &config).await
        }
        Commands::ForgotPassword { email } => commands::auth::forgot_password(&email, &config).await,
        Commands::ResetPassword { token } => commands::auth::reset_password(&token, &config).await,
        Commands::VerifyEmail { token } => commands::auth::verify_email(&token, &config).await,
        Commands::Shell { email, token } => commands::shell::execute(email, token, &config).await,
        Commands::Config => commands::show_config(&config),
        Commands::Version => {
            println!("sphere {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
