//! Where the user is sent when the session starts or ends
//!
//! In a browser this is page navigation. The CLI has no pages, so an
//! interactive terminal plays the browsing context: it "navigates" by telling
//! the user where to go. Non-interactive runs (scripts, pipes) have no
//! browsing context at all.

use std::io::IsTerminal;
use std::sync::Mutex;

use colored::Colorize;

/// Path of the login surface
pub const LOGIN_PATH: &str = "/login";

/// Navigation target for the user-facing side of the session
pub trait Navigator: Send + Sync {
    /// Current location, or `None` when not running in a browsing context
    fn current_path(&self) -> Option<String>;

    /// Send the user to `target` (a path or an absolute URL)
    fn navigate(&self, target: &str);
}

/// Whether `path` is already part of the login flow
pub fn is_auth_path(path: &str) -> bool {
    path.starts_with(LOGIN_PATH) || path.starts_with("/auth")
}

/// Navigate to the login surface unless there is no browsing context or the
/// user is already on a login/auth path. Returns true if navigation happened.
pub fn redirect_to_login(navigator: &dyn Navigator) -> bool {
    match navigator.current_path() {
        Some(path) if !is_auth_path(&path) => {
            navigator.navigate(LOGIN_PATH);
            true
        }
        Some(_) => {
            log::debug!("Already on an auth path, not redirecting");
            false
        }
        None => false,
    }
}

/// Navigator backed by the user's terminal
#[derive(Debug)]
pub struct TerminalNavigator {
    interactive: bool,
    path: Mutex<String>,
}

impl TerminalNavigator {
    /// Detect whether stderr is attached to a terminal
    pub fn detect() -> Self {
        Self::new(std::io::stderr().is_terminal())
    }

    pub fn new(interactive: bool) -> Self {
        Self {
            interactive,
            path: Mutex::new("/".to_string()),
        }
    }
}

impl Navigator for TerminalNavigator {
    fn current_path(&self) -> Option<String> {
        if !self.interactive {
            return None;
        }
        let path = self.path.lock().unwrap_or_else(|p| p.into_inner());
        Some(path.clone())
    }

    fn navigate(&self, target: &str) {
        if target.starts_with("http://") || target.starts_with("https://") {
            eprintln!("{} {}", "Open this URL to continue:".bold(), target.cyan());
        } else if is_auth_path(target) {
            eprintln!(
                "{} Run {} to sign in.",
                "Session ended.".yellow(),
                "cardctl login".cyan()
            );
        } else {
            log::debug!("Navigate to {}", target);
        }

        if !target.starts_with("http") {
            *self.path.lock().unwrap_or_else(|p| p.into_inner()) = target.to_string();
        }
    }
}

/// Navigator that records every navigation, for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingNavigator {
    path: Mutex<Option<String>>,
    visited: Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingNavigator {
    /// A browsing context currently showing `path`
    pub(crate) fn at(path: &str) -> Self {
        Self {
            path: Mutex::new(Some(path.to_string())),
            visited: Mutex::new(Vec::new()),
        }
    }

    /// No browsing context
    pub(crate) fn headless() -> Self {
        Self::default()
    }

    pub(crate) fn visited(&self) -> Vec<String> {
        self.visited.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Navigator for RecordingNavigator {
    fn current_path(&self) -> Option<String> {
        self.path.lock().unwrap().clone()
    }

    fn navigate(&self, target: &str) {
        self.visited.lock().unwrap().push(target.to_string());
        let mut path = self.path.lock().unwrap();
        if path.is_some() && !target.starts_with("http") {
            *path = Some(target.to_string());
        }
    }
}
