//! Account commands that do not need a session.

use anyhow::Result;
use colored::Colorize;
use dialoguer::Password;

use super::{client, print_ack, with_spinner};
use crate::config::Config;

fn new_password() -> Result<String> {
    Ok(Password::new()
        .with_prompt("Password")
        .with_confirmation("Confirm password", "Passwords do not match")
        .interact()?)
}

/// Create an account.
pub async fn register(username: &str, email: &str, config: &Config) -> Result<()> {
    let password = new_password()?;
    let client = client(config)?;

    let message = with_spinner("Registering...", client.register(username, email, &password)).await?;
    print_ack(message, "Registered. Check your inbox to verify your email.");
    Ok(())
}

/// Request a password reset email.
pub async fn forgot_password(email: &str, config: &Config) -> Result<()> {
    let client = client(config)?;
    let message = with_spinner("Requesting reset...", client.forgot_password(email)).await?;
    print_ack(message, "If the account exists, a reset link is on its way.");
    Ok(())
}

/// Set a new password with a reset token.
pub async fn reset_password(token: &str, config: &Config) -> Result<()> {
    let password = new_password()?;
    let client = client(config)?;

    let message = with_spinner(
        "Resetting password...",
        client.reset_password(token, &password, &password),
    )
    .await?;
    print_ack(message, "Password updated. You can now log in.");
    Ok(())
}

/// Confirm an email address.
pub async fn verify_email(token: &str, config: &Config) -> Result<()> {
    let client = client(config)?;
    match with_spinner("Verifying...", client.verify_email(token)).await {
        Ok(message) => {
            print_ack(message, "Email verified.");
            Ok(())
        }
        Err(e) => {
            println!("{} Verification failed: {}", "✗".red(), e);
            println!("  Run {} from the shell for a new link.", "resend-verification".cyan());
            Err(e.into())
        }
    }
}
