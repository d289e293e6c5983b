//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.tether/config.json`) and
//! environment. Covers the gateway endpoint and the client identity sent in
//! the handshake.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway endpoint settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Client identity for the handshake.
    #[serde(default)]
    pub client: ClientConfig,
}

/// Gateway URL and auth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// WebSocket URL (default "ws://127.0.0.1:15151/ws").
    #[serde(default = "default_gateway_url")]
    pub url: String,

    /// Auth settings. When absent, connects without a token.
    #[serde(default)]
    pub auth: GatewayAuthConfig,
}

/// Gateway auth: optional shared token sent in the client hello.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAuthConfig {
    /// Shared secret for the handshake. Overridden by TETHER_GATEWAY_TOKEN env.
    pub token: Option<String>,
}

/// Client identity advertised in the hello.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Client identifier (default "tether-cli").
    #[serde(default = "default_client_id")]
    pub id: String,

    /// Capabilities advertised to the gateway (default chat + terminal).
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<String>,
}

fn default_gateway_url() -> String {
    "ws://127.0.0.1:15151/ws".to_string()
}

fn default_client_id() -> String {
    "tether-cli".to_string()
}

fn default_capabilities() -> Vec<String> {
    vec!["chat".to_string(), "terminal".to_string()]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            auth: GatewayAuthConfig::default(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            id: default_client_id(),
            capabilities: default_capabilities(),
        }
    }
}

/// Resolve the gateway token: env TETHER_GATEWAY_TOKEN overrides config.
pub fn resolve_gateway_token(config: &Config) -> Option<String> {
    std::env::var("TETHER_GATEWAY_TOKEN")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            config
                .gateway
                .auth
                .token
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("TETHER_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".tether").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or TETHER_CONFIG_PATH). Missing file
/// => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Write a default config file at `path`, creating parent directories.
/// Refuses to overwrite an existing file.
pub fn write_default_config(path: &PathBuf) -> Result<()> {
    if path.exists() {
        anyhow::bail!("config already exists at {}", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let s = serde_json::to_string_pretty(&Config::default())?;
    std::fs::write(path, s).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
