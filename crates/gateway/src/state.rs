use std::path::PathBuf;
use std::sync::Arc;

use wsb_domain::config::Config;
use wsb_engine::locks::LockRegistry;
use wsb_engine::tokens::TokenStore;

/// Shared application state passed to every handler via axum's `State`
/// extractor. Fields are grouped by concern, same convention the teacher's
/// `AppState` used.
#[derive(Clone)]
pub struct AppState {
    // ── Core ─────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    /// Absolute physical root the virtual namespace is rooted at.
    pub root: PathBuf,

    // ── Request engine ───────────────────────────────────────────────
    pub locks: Arc<LockRegistry>,
    pub tokens: Arc<TokenStore>,

    // ── Theme search paths ───────────────────────────────────────────
    pub theme_static_dirs: Arc<Vec<PathBuf>>,

    // ── Security (startup-computed) ──────────────────────────────────
    /// `true` if `[auth]` was entirely absent from the loaded config,
    /// meaning every request is granted `all` permission.
    pub auth_open: bool,
}

impl AppState {
    pub fn wsb_dir(&self) -> PathBuf {
        self.root.join(".wsb")
    }
}
