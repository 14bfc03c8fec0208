pub mod config;

use clap::{Parser, Subcommand};

/// wsbd — a single-host scrapbook server.
#[derive(Debug, Parser)]
#[command(name = "wsbd", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the layered configuration and report any issues.
    Validate,
    /// Dump the fully resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading ───────────────────────────────────────────────────────

/// Loads and merges the three configuration layers described in
/// `wsb_domain::config`: compiled-in defaults, a user-level file, then a
/// repository-level file, each one overriding the last.
pub fn load_config() -> anyhow::Result<(wsb_domain::config::Config, String)> {
    let mut config = wsb_domain::config::Config::default();
    let mut last_path = String::from("(defaults)");

    if let Some(user_path) = user_config_path() {
        if let Some(overlay) = read_overlay(&user_path)? {
            config = wsb_domain::config::merge(config, overlay)
                .map_err(|e| anyhow::anyhow!("parsing {}: {e}", user_path.display()))?;
            last_path = user_path.display().to_string();
        }
    }

    let repo_path = repo_config_path(&config);
    if let Some(overlay) = read_overlay(&repo_path)? {
        config = wsb_domain::config::merge(config, overlay)
            .map_err(|e| anyhow::anyhow!("parsing {}: {e}", repo_path.display()))?;
        last_path = repo_path.display().to_string();
    }

    Ok((config, last_path))
}

fn user_config_path() -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|d| d.join("wsb").join("config.toml"))
}

fn repo_config_path(config: &wsb_domain::config::Config) -> std::path::PathBuf {
    std::path::Path::new(&config.app.root)
        .join(".wsb")
        .join("config.toml")
}

fn read_overlay(path: &std::path::Path) -> anyhow::Result<Option<toml::Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
    let value: toml::Value =
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;
    Ok(Some(value))
}
