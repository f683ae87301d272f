//! Login and callback commands

use std::io::IsTerminal;

use colored::Colorize;
use dialoguer::{Input, theme::ColorfulTheme};

use crate::cli::CommandContext;
use crate::error::{Error, Result};

/// Run the login command
///
/// Sends the user to the backend's authorization URL. In an interactive
/// terminal the user then pastes the callback URL to finish signing in.
pub async fn login(ctx: &CommandContext, no_prompt: bool) -> Result<()> {
    ctx.session.initialize().await;
    if ctx.session.state().is_authenticated {
        println!("{} Already signed in", "✓".green());
        return Ok(());
    }

    let url = ctx.session.login().await?;
    log::debug!("Authorization URL: {}", url);

    if no_prompt || !std::io::stdin().is_terminal() {
        println!(
            "After authorizing, run {}",
            "cardctl callback --code <CODE> --state <STATE>".cyan()
        );
        return Ok(());
    }

    let pasted: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Paste the callback URL")
        .interact_text()?;
    let (code, state) = parse_callback(&pasted)?;

    callback(ctx, &code, &state).await
}

/// Run the callback command
pub async fn callback(ctx: &CommandContext, code: &str, state: &str) -> Result<()> {
    println!("{}", "Completing sign-in...".cyan());
    let session = ctx.session.complete_login(code, state).await?;

    if session.is_authenticated {
        println!("{}", "✓ Signed in!".green());
        if session.is_admin {
            println!("  Role: {}", "admin".bold());
        }
        Ok(())
    } else {
        Err(Error::Other(
            "Backend accepted the callback but the session is not valid".to_string(),
        ))
    }
}

/// Extract `code` and `state` from a pasted callback URL
fn parse_callback(input: &str) -> Result<(String, String)> {
    let url = reqwest::Url::parse(input.trim())
        .map_err(|e| Error::Other(format!("Not a callback URL: {}", e)))?;

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            _ => {}
        }
    }

    match (code, state) {
        (Some(code), Some(state)) => Ok((code, state)),
        (None, _) => Err(Error::Other(
            "Callback URL has no `code` parameter".to_string(),
        )),
        (_, None) => Err(Error::Other(
            "Callback URL has no `state` parameter".to_string(),
        )),
    }
}
