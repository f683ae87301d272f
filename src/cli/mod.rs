//! CLI command definitions and handlers

use clap::{Parser, Subcommand};

pub mod args;
pub mod context;
pub mod login;
pub mod request;
pub mod session;
pub mod status;

pub use args::{GlobalOptions, OutputFormat};
pub use context::CommandContext;

/// cardctl - session-aware client for the card admin backend
#[derive(Parser, Debug)]
#[command(name = "cardctl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (pretty, json)
    #[arg(
        long,
        global = true,
        env = "CARDCTL_FORMAT",
        default_value = "pretty",
        hide_env = true
    )]
    pub format: OutputFormat,

    /// Override config file location
    #[arg(long, global = true, env = "CARDCTL_CONFIG", hide_env = true)]
    pub config: Option<String>,

    /// Override the backend base URL
    #[arg(long, global = true, env = "CARDCTL_API_URL", hide_env = true)]
    pub api_url: Option<String>,

    /// Override the token store location
    #[arg(long, global = true, env = "CARDCTL_TOKEN_STORE", hide_env = true)]
    pub token_store: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true, env = "CARDCTL_DEBUG", hide_env = true)]
    pub debug: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in through the backend's Discord login
    Login {
        /// Only print the authorization URL, do not prompt for the callback
        #[arg(long)]
        no_prompt: bool,
    },

    /// Complete a login with the callback parameters
    Callback {
        /// `code` query parameter of the callback URL
        #[arg(long)]
        code: String,

        /// `state` query parameter of the callback URL
        #[arg(long)]
        state: String,
    },

    /// Show session status (refreshes an expired session)
    Status,

    /// Show the claims of the stored access token without contacting the backend
    Whoami,

    /// Refresh the access token now
    Refresh,

    /// Sign out and clear stored tokens
    Logout,

    /// Call a backend endpoint through the session gateway
    Get {
        /// API path, e.g. /api/cards?page=1
        path: String,

        /// Extra request header, `Name: value` (repeatable)
        #[arg(short = 'H', long = "header", value_name = "HEADER")]
        headers: Vec<String>,

        /// Print only the envelope's `data` field
        #[arg(long)]
        data: bool,
    },

    /// Send a JSON body to a backend endpoint through the session gateway
    Post {
        /// API path, e.g. /api/shop/purchase
        path: String,

        /// Extra request header, `Name: value` (repeatable)
        #[arg(short = 'H', long = "header", value_name = "HEADER")]
        headers: Vec<String>,

        /// JSON request body (defaults to `{}`)
        #[arg(long)]
        body: Option<String>,
    },

    /// Keep the session alive and report state changes until interrupted
    Watch,

    /// Display version information
    Version,
}
