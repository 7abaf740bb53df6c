//! Configuration management commands.
//!
//! The only persisted setting is the default replica URL, kept in
//! `~/.license/config.toml`. `--api-url` and `LICENSE_API_URL` take precedence.

use anyhow::{Context, Result};
use clap::Subcommand;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Set the default API server URL
    SetUrl {
        /// Replica base URL, e.g. http://replica-b:8000
        url: String,
    },

    /// Show the stored configuration
    Show,

    /// Forget the stored API server URL
    Reset {
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CliConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".license").join("config.toml"))
}

/// Load the configuration at `path`, returning defaults if the file does not exist.
fn load_config_from(path: &Path) -> Result<CliConfig> {
    if !path.exists() {
        return Ok(CliConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn save_config_to(path: &Path, cfg: &CliConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(cfg).context("Failed to serialize config")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Accepts only absolute http(s) URLs; the trailing slash is dropped.
fn normalize_url(raw: &str) -> Result<String> {
    let url = Url::parse(raw).with_context(|| format!("'{}' is not a valid URL", raw))?;
    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("'{}' must use http or https", raw);
    }
    Ok(raw.trim_end_matches('/').to_string())
}

/// The stored API URL, if one was set.
pub fn load_api_url() -> Option<String> {
    config_path()
        .and_then(|path| load_config_from(&path))
        .ok()
        .and_then(|cfg| cfg.api_url)
}

pub async fn execute(cmd: ConfigCommands, format: OutputFormat) -> Result<()> {
    let path = config_path()?;

    match cmd {
        ConfigCommands::SetUrl { url } => {
            let url = normalize_url(&url)?;
            let mut cfg = load_config_from(&path)?;
            cfg.api_url = Some(url.clone());
            save_config_to(&path, &cfg)?;

            match format {
                OutputFormat::Table => output::print_success(&format!("api-url = {}", url)),
                _ => output::print_item(&cfg, format)?,
            }
        }

        ConfigCommands::Show => {
            let cfg = load_config_from(&path)?;
            match format {
                OutputFormat::Table => match &cfg.api_url {
                    Some(url) => {
                        output::print_header("Configuration");
                        output::print_detail("api-url", url);
                    }
                    None => output::print_info("No API URL set; using http://localhost:8000"),
                },
                _ => output::print_item(&cfg, format)?,
            }
        }

        ConfigCommands::Reset { force } => {
            if !force {
                output::print_info("This will forget the stored API URL. Use --force to confirm.");
                return Ok(());
            }
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
            output::print_success("Configuration reset to defaults");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.api_url, None);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let cfg = CliConfig {
            api_url: Some("http://replica-b:8000".to_string()),
        };
        save_config_to(&path, &cfg).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("api-url = \"http://replica-b:8000\""));
        assert_eq!(load_config_from(&path).unwrap(), cfg);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "api-url = 3").unwrap();

        assert!(load_config_from(&path).is_err());
    }

    #[test]
    fn test_set_url_rejects_non_http_values() {
        assert_eq!(
            normalize_url("https://replica-a:8443/").unwrap(),
            "https://replica-a:8443"
        );
        assert!(normalize_url("replica-a:8000").is_err());
        assert!(normalize_url("ftp://replica-a").is_err());
        assert!(normalize_url("not a url").is_err());
    }
}
