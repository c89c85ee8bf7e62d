//! CLI argument definitions using clap derive macros.

use clap::{Parser, Subcommand};

/// SocialSphere terminal client
#[derive(Parser, Debug)]
#[command(name = "sphere")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an account (password is prompted)
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        email: String,
    },

    /// Request a password reset email
    ForgotPassword {
        #[arg(short, long)]
        email: String,
    },

    /// Set a new password using the token from a reset email
    ResetPassword {
        /// Reset token
        token: String,
    },

    /// Confirm an email address
    VerifyEmail {
        /// Verification token
        token: String,
    },

    /// Log in and open the interactive shell
    Shell {
        /// Account email (prompted if omitted)
        #[arg(short, long)]
        email: Option<String>,

        /// Access token from the social login redirect
        #[arg(short, long, conflicts_with = "email")]
        token: Option<String>,
    },

    /// Print the effective configuration
    Config,

    /// Show version
    Version,
}
