//! Command execution context
//!
//! Wires config, token store, invalidation bus, navigator, gateway and
//! session controller together once, so command handlers only deal with
//! their own logic.

use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::{InvalidationBus, Navigator, TerminalNavigator};
use crate::cli::{GlobalOptions, OutputFormat};
use crate::client::RequestGateway;
use crate::config::Config;
use crate::error::Result;
use crate::session::SessionController;
use crate::store::{SqliteTokenStore, TokenStore};

/// Context for command execution
pub struct CommandContext {
    /// Loaded configuration with CLI overrides applied
    pub config: Config,
    /// Shared token store
    pub store: Arc<dyn TokenStore>,
    /// Gateway for every backend call
    pub gateway: Arc<RequestGateway>,
    /// Session state owner
    pub session: SessionController<RequestGateway>,
    /// Output format preference
    pub format: OutputFormat,
}

impl CommandContext {
    /// Create a new command context.
    ///
    /// # Errors
    /// Returns error if the config cannot be loaded, an override is invalid,
    /// or the token store cannot be opened.
    pub fn new(opts: &GlobalOptions) -> Result<Self> {
        let mut config = Config::load_at(opts.config_ref())?;

        if let Some(url) = &opts.api_url {
            config.api_base_url = url.clone();
        }
        if let Some(path) = &opts.token_store {
            config.token_store = Some(PathBuf::from(path));
        }
        config.validate()?;

        let sqlite = SqliteTokenStore::open_at(&config.token_store_path()?)?;
        log::debug!("Using token store {}", sqlite.path().display());
        let store: Arc<dyn TokenStore> = Arc::new(sqlite);

        let navigator: Arc<dyn Navigator> = Arc::new(TerminalNavigator::detect());
        let bus = InvalidationBus::new();
        let gateway = Arc::new(RequestGateway::new(
            &config,
            Arc::clone(&store),
            bus,
            Arc::clone(&navigator),
        )?);
        let session = SessionController::new(
            Arc::clone(&gateway),
            navigator,
            config.session.clone(),
        );

        Ok(Self {
            config,
            store,
            gateway,
            session,
            format: opts.format,
        })
    }
}
