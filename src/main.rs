//! cardctl - session-aware command-line client for the card admin backend

use clap::Parser;

mod auth;
mod cli;
mod client;
mod config;
mod error;
mod session;
mod store;

use cli::{Cli, CommandContext, Commands, GlobalOptions};
use error::{Error, Result};

/// Exit status when the session is gone and `cardctl login` is needed
const EXIT_SIGNED_OUT: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Err(err) = run(cli).await {
        report(&err);
        std::process::exit(exit_code(&err));
    }
}

fn report(err: &Error) {
    eprintln!("Error: {}", err);
    if let Some(api) = err.as_api() {
        if let Some(status) = api.status() {
            log::debug!("Backend answered {}", status);
        }
        if let Some(body) = api.body().filter(|body| !body.trim().is_empty()) {
            log::debug!("Response body: {}", body);
        }
    }
}

fn exit_code(err: &Error) -> i32 {
    match err.as_api() {
        Some(api) if api.is_authentication() => EXIT_SIGNED_OUT,
        _ => 1,
    }
}

/// `RUST_LOG` wins unless `--debug` asks for this crate's debug output
fn init_logging(debug: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if debug {
        builder.filter_module("cardctl", log::LevelFilter::Debug);
    }
    let _ = builder.format_timestamp(None).try_init();
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Version = cli.command {
        println!("cardctl version {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let opts = GlobalOptions::from_cli(&cli);
    let ctx = CommandContext::new(&opts)?;

    match cli.command {
        Commands::Login { no_prompt } => cli::login::login(&ctx, no_prompt).await,
        Commands::Callback { code, state } => cli::login::callback(&ctx, &code, &state).await,
        Commands::Status => cli::status::status(&ctx).await,
        Commands::Whoami => cli::status::whoami(&ctx),
        Commands::Refresh => cli::session::refresh(&ctx).await,
        Commands::Logout => cli::session::logout(&ctx).await,
        Commands::Get {
            path,
            headers,
            data,
        } => cli::request::get(&ctx, &path, &headers, data).await,
        Commands::Post {
            path,
            headers,
            body,
        } => cli::request::post(&ctx, &path, &headers, body.as_deref()).await,
        Commands::Watch => cli::session::watch(&ctx).await,
        Commands::Version => Ok(()),
    }
}
