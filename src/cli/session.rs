//! Refresh, logout and watch commands

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;

use crate::auth::decode;
use crate::cli::{CommandContext, OutputFormat};
use crate::error::Result;
use crate::session::SessionState;

/// How often `watch` looks for token writes made by other processes
const STORE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Run the refresh command
pub async fn refresh(ctx: &CommandContext) -> Result<()> {
    let pair = ctx.gateway.refresh().await?;

    println!("{} Access token refreshed", "✓".green());
    if let Some(expires) = decode(&pair.access_token).and_then(|c| c.expires_at_time()) {
        println!("  Expires at {}", expires.to_rfc3339());
    }
    if pair.refresh_token.is_some() {
        println!("  Refresh token rotated");
    }
    Ok(())
}

/// Run the logout command
pub async fn logout(ctx: &CommandContext) -> Result<()> {
    ctx.session.logout().await;
    println!("{} Signed out", "✓".green());
    Ok(())
}

fn print_state(state: SessionState, format: OutputFormat) {
    if format == OutputFormat::Json {
        println!(
            "{}",
            serde_json::json!({
                "is_authenticated": state.is_authenticated,
                "is_admin": state.is_admin,
                "is_loading": state.is_loading,
            })
        );
        return;
    }

    match (state.is_authenticated, state.is_admin) {
        (true, true) => println!("{} Signed in (admin)", "●".green()),
        (true, false) => println!("{} Signed in", "●".green()),
        (false, _) => println!("{} Signed out", "●".red()),
    }
}

/// Run the watch command: keep the session fresh until Ctrl-C, following
/// logins, logouts and refreshes made by other cardctl processes
pub async fn watch(ctx: &CommandContext) -> Result<()> {
    let relay = ctx.gateway.bus().forward_store_changes(&ctx.store);

    let store = Arc::clone(&ctx.store);
    let poller = tokio::spawn(async move {
        let mut interval = tokio::time::interval(STORE_POLL_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = store.poll_changes() {
                log::warn!("Failed to poll token store: {}", e);
            }
        }
    });

    let mut states = ctx.session.subscribe();
    let format = ctx.format;
    let printer = async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            print_state(state, format);
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctx.session.run(shutdown) => {}
        _ = printer => {}
    }

    poller.abort();
    relay.abort();
    Ok(())
}
