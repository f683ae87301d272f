//! Status and whoami commands

use chrono::Utc;
use colored::Colorize;
use serde::Serialize;

use crate::auth::{Claims, decode};
use crate::cli::{CommandContext, OutputFormat};
use crate::error::Result;

/// Machine-readable session report
#[derive(Debug, Serialize)]
struct StatusReport {
    api_base_url: String,
    token_store: String,
    is_authenticated: bool,
    is_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<String>,
}

fn stored_claims(ctx: &CommandContext) -> Result<Option<Claims>> {
    Ok(ctx.gateway.access_token()?.as_deref().and_then(decode))
}

/// "1h 5m" style remaining time
fn remaining(claims: &Claims) -> String {
    let left = claims.time_to_expiry(Utc::now());
    if left <= chrono::Duration::zero() {
        return "expired".to_string();
    }
    format!("{}h {}m", left.num_hours(), left.num_minutes() % 60)
}

/// Run the status command: derive the session (refreshing if needed) and
/// report it
pub async fn status(ctx: &CommandContext) -> Result<()> {
    let session = ctx.session.initialize().await;
    let claims = stored_claims(ctx)?;
    let store_path = ctx.config.token_store_path()?;

    if ctx.format == OutputFormat::Json {
        let report = StatusReport {
            api_base_url: ctx.config.api_base_url.clone(),
            token_store: store_path.display().to_string(),
            is_authenticated: session.is_authenticated,
            is_admin: session.is_admin,
            subject: claims.as_ref().map(|c| c.subject.clone()),
            expires_at: claims
                .as_ref()
                .and_then(Claims::expires_at_time)
                .map(|t| t.to_rfc3339()),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}\n", "cardctl Session Status".bold());
    println!("Backend: {}", ctx.config.api_base_url.cyan());
    println!("Token store: {}", store_path.display().to_string().cyan());
    println!();

    if !session.is_authenticated {
        println!("{} Not signed in", "✗".red());
        println!("  → Run 'cardctl login' to sign in");
        return Ok(());
    }

    match &claims {
        Some(claims) => {
            println!("{} Signed in as {}", "✓".green(), claims.subject.bold());
            println!(
                "{} Access token valid (expires in {})",
                "✓".green(),
                remaining(claims)
            );
        }
        None => println!("{} Signed in (token claims unreadable)", "⚠".yellow()),
    }

    if session.is_admin {
        println!("{} Admin privileges", "✓".green());
    } else {
        println!("{} No admin privileges", "○".dimmed());
    }

    Ok(())
}

/// Run the whoami command: decode the stored token, no network
pub fn whoami(ctx: &CommandContext) -> Result<()> {
    let token = ctx.gateway.access_token()?;
    let claims = token.as_deref().and_then(decode);

    if ctx.format == OutputFormat::Json {
        let value = match &claims {
            Some(c) => serde_json::json!({
                "subject": c.subject,
                "is_admin": c.is_admin,
                "expires_at": c.expires_at,
                "expired": !c.is_valid_at(Utc::now()),
            }),
            None => serde_json::json!({ "subject": null }),
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match (token, claims) {
        (None, _) => println!("{} No access token stored", "○".dimmed()),
        (Some(_), None) => println!("{} Stored access token is not readable", "⚠".yellow()),
        (Some(_), Some(c)) => {
            println!("Subject: {}", c.subject.bold());
            println!("Admin: {}", if c.is_admin { "yes" } else { "no" });
            if c.is_valid_at(Utc::now()) {
                println!("Expires in: {}", remaining(&c));
            } else {
                println!(
                    "{} Expired (will refresh on next command)",
                    "⚠".yellow()
                );
            }
        }
    }

    Ok(())
}
