//! Command implementations for sphere CLI.

pub mod auth;
pub mod shell;

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use sphere_core::{ApiClient, SessionStore};
use std::future::Future;
use std::time::Duration;

use crate::config::Config;

/// Build an API client with a fresh, unauthenticated session.
pub(crate) fn client(config: &Config) -> Result<ApiClient> {
    ApiClient::new(&config.client_config(), SessionStore::new()).context("Failed to create API client")
}

/// Await `work` behind a spinner.
pub(crate) async fn with_spinner<T>(message: &str, work: impl Future<Output = T>) -> T {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    let out = work.await;
    spinner.finish_and_clear();
    out
}

/// Print a server acknowledgement, or `fallback` when the body had none.
pub(crate) fn print_ack(message: Option<String>, fallback: &str) {
    println!(
        "{} {}",
        "✓".green(),
        message.as_deref().unwrap_or(fallback)
    );
}

/// Print the effective configuration.
pub fn show_config(config: &Config) -> Result<()> {
    let path = Config::config_path();
    println!("{}", "Configuration".bold());
    println!("{}", "─".repeat(40));
    match path {
        Some(path) if path.exists() => println!("  File:      {}", path.display().to_string().cyan()),
        Some(path) => println!("  File:      {} (not present)", path.display().to_string().dimmed()),
        None => println!("  File:      {}", "none".dimmed()),
    }
    println!("  API:       {}", config.api.url);
    println!("  Timeout:   {}s", config.api.timeout_secs);
    let client = config.client_config();
    match client.channel_url() {
        Ok(url) if config.channel.enabled => println!("  Channel:   {}", url),
        Ok(_) => println!("  Channel:   {}", "disabled".yellow()),
        Err(e) => println!("  Channel:   {} {}", "✗".red(), e),
    }
    Ok(())
}
