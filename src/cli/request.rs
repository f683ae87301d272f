//! Generic backend request commands

use colored::Colorize;
use reqwest::Method;
use reqwest::header::{HeaderName, HeaderValue};
use serde_json::Value;

use crate::cli::{CommandContext, OutputFormat};
use crate::client::RequestOptions;
use crate::error::{Error, Result};

/// Run the get command
///
/// With `data_only` the response must be an envelope; its `data` is printed
/// and pagination goes to stderr.
pub async fn get(
    ctx: &CommandContext,
    path: &str,
    headers: &[String],
    data_only: bool,
) -> Result<()> {
    let path = normalize_path(path);
    let options = with_headers(RequestOptions::new(), headers)?;
    log::debug!("Fetching {}", path);

    if !data_only {
        let value: Value = ctx.gateway.request(&path, options).await?;
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let envelope = ctx.gateway.fetch::<Value>(&path, options).await?;
    println!("{}", serde_json::to_string_pretty(&envelope.data)?);
    if let (Some(page), OutputFormat::Pretty) = (envelope.pagination, ctx.format) {
        eprintln!(
            "{}",
            format!(
                "Page {} of {} ({} items)",
                page.page, page.total_pages, page.total_items
            )
            .dimmed()
        );
        if page.has_more_pages() {
            eprintln!("{}", "More pages available, use ?page=N".dimmed());
        }
    }

    Ok(())
}

/// Run the post command
pub async fn post(
    ctx: &CommandContext,
    path: &str,
    headers: &[String],
    body: Option<&str>,
) -> Result<()> {
    let body: Value = match body {
        Some(raw) => serde_json::from_str(raw)?,
        None => Value::Object(Default::default()),
    };
    let options = with_headers(RequestOptions::new().method(Method::POST), headers)?.json(body);
    let value: Value = ctx.gateway.request(&normalize_path(path), options).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Apply `Name: value` header arguments
fn with_headers(mut options: RequestOptions, headers: &[String]) -> Result<RequestOptions> {
    for raw in headers {
        let (name, value) = raw
            .split_once(':')
            .ok_or_else(|| Error::Other(format!("Header '{}' is not 'Name: value'", raw)))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| Error::Other(format!("Invalid header name '{}': {}", name.trim(), e)))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| Error::Other(format!("Invalid value for header {}: {}", name, e)))?;
        options = options.header(name, value);
    }
    Ok(options)
}

/// Accept `cards` as shorthand for `/cards`
fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/api/cards"), "/api/cards");
        assert_eq!(normalize_path("api/cards?page=2"), "/api/cards?page=2");
    }

    #[test]
    fn test_header_arguments() {
        let opts = with_headers(
            RequestOptions::new(),
            &["X-Request-Id: 42".to_string(), "accept:text/csv".to_string()],
        )
        .unwrap();
        assert_eq!(opts.headers["x-request-id"], "42");
        assert_eq!(opts.headers["accept"], "text/csv");

        assert!(with_headers(RequestOptions::new(), &["no-colon".to_string()]).is_err());
        assert!(with_headers(RequestOptions::new(), &["bad name: x".to_string()]).is_err());
    }
}
