//! Configuration loading and persistence.
//!
//! The on-disk format is the same JSON document the operator imports and
//! exports, so a file written by `config export` can be handed to
//! `connect --config` on another machine unchanged.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::constants::{DEFAULT_CHANNEL_LABEL, DEFAULT_SIGNALING_URL, DEFAULT_STUN_SERVER};
use crate::engine::ChannelOptions;
use crate::signaling::ProtocolMode;
use crate::ws::http_to_ws_scheme;

/// One or many ICE server URLs.
///
/// The interchange format allows `urls` as a plain string or an array.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum IceUrls {
    /// A single URL.
    One(String),
    /// Several URLs sharing the same credentials.
    Many(Vec<String>),
}

impl IceUrls {
    /// Flatten into a list of URLs.
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(url) => vec![url.clone()],
            Self::Many(urls) => urls.clone(),
        }
    }
}

/// A STUN or TURN server entry.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct IceServerConfig {
    /// Server URL(s), e.g. `stun:stun.l.google.com:19302`.
    pub urls: IceUrls,
    /// TURN username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// TURN credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Relay connection settings.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SignalingConfig {
    /// WebSocket URL of the relay.
    pub url: String,
    /// Frame encoding for outbound signaling messages.
    pub protocol: ProtocolMode,
}

/// Parameters of the channel an offerer creates before its offer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    /// Channel label.
    pub label: String,
    /// Whether delivery is ordered.
    pub ordered: bool,
    /// Retransmit limit; `None` means reliable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retransmits: Option<u16>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            label: DEFAULT_CHANNEL_LABEL.to_string(),
            ordered: true,
            max_retransmits: None,
        }
    }
}

impl ChannelConfig {
    /// Engine options for this channel.
    pub fn options(&self) -> ChannelOptions {
        ChannelOptions {
            ordered: self.ordered,
            max_retransmits: self.max_retransmits,
        }
    }
}

/// Configuration for the debugger session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// STUN/TURN servers handed to the peer transport engine.
    pub ice_servers: Vec<IceServerConfig>,
    /// Relay settings.
    pub signaling: SignalingConfig,
    /// Redial after the relay drops an established session.
    pub auto_reconnect: bool,
    /// Verbose logging, including swallowed stats failures.
    pub debug_mode: bool,
    /// UI theme name. Carried for interchange; the CLI ignores it.
    pub theme: String,
    /// Channel created eagerly by the offerer.
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Where completed inbound files are written. `None` keeps them in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerConfig {
                urls: IceUrls::One(DEFAULT_STUN_SERVER.to_string()),
                username: None,
                credential: None,
            }],
            signaling: SignalingConfig {
                url: DEFAULT_SIGNALING_URL.to_string(),
                protocol: ProtocolMode::Json,
            },
            auto_reconnect: true,
            debug_mode: false,
            theme: "dark".to_string(),
            channel: ChannelConfig::default(),
            download_dir: None,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `RTC_DEBUGGER_CONFIG_DIR` overrides the platform config directory.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("RTC_DEBUGGER_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("rtc-debugger")
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Default path of the config file.
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Loads configuration, with environment variable overrides.
    ///
    /// An explicit `path` must exist. Without one, the default file is used
    /// when present and built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default_path()
                .and_then(|p| Self::load_from_file(&p))
                .unwrap_or_default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a config document from `path`.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("RTC_DEBUGGER_SIGNALING_URL") {
            self.signaling.url = url;
        }
        // Relays are often given as the page URL
        self.signaling.url = http_to_ws_scheme(&self.signaling.url);

        if let Some(protocol) = lookup("RTC_DEBUGGER_PROTOCOL") {
            if let Ok(mode) = protocol.parse::<ProtocolMode>() {
                self.signaling.protocol = mode;
            }
        }

        if let Some(flag) = lookup("RTC_DEBUGGER_AUTO_RECONNECT") {
            if let Some(value) = parse_flag(&flag) {
                self.auto_reconnect = value;
            }
        }

        if let Some(flag) = lookup("RTC_DEBUGGER_DEBUG") {
            if let Some(value) = parse_flag(&flag) {
                self.debug_mode = value;
            }
        }
    }

    /// Writes the configuration as pretty JSON to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;

        // TURN credentials may be present
        #[cfg(unix)]
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.signaling.url, "ws://localhost:3000");
        assert_eq!(config.signaling.protocol, ProtocolMode::Json);
        assert!(config.auto_reconnect);
        assert!(!config.debug_mode);
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.channel.label, "chat");
    }

    #[test]
    fn test_serializes_interchange_keys() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["iceServers"][0]["urls"], "stun:stun.l.google.com:19302");
        assert_eq!(json["signaling"]["protocol"], "json");
        assert_eq!(json["autoReconnect"], true);
        assert_eq!(json["debugMode"], false);
        assert_eq!(json["theme"], "dark");
        assert!(json.get("downloadDir").is_none());
    }

    #[test]
    fn test_parses_exported_document_without_supplements() {
        let doc = r#"{
            "iceServers": [
                {"urls": ["turn:turn.example.com:3478", "turns:turn.example.com:5349"],
                 "username": "u", "credential": "p"}
            ],
            "signaling": {"url": "wss://relay.example.com", "protocol": "binary"},
            "autoReconnect": false,
            "debugMode": true,
            "theme": "light"
        }"#;
        let config: Config = serde_json::from_str(doc).unwrap();
        assert_eq!(config.signaling.protocol, ProtocolMode::Binary);
        assert_eq!(config.ice_servers[0].urls.to_vec().len(), 2);
        assert_eq!(config.ice_servers[0].username.as_deref(), Some("u"));
        assert_eq!(config.channel, ChannelConfig::default());
        assert!(!config.auto_reconnect);
    }

    #[test]
    fn test_overrides_apply_and_ignore_garbage() {
        let vars: HashMap<&str, &str> = [
            ("RTC_DEBUGGER_SIGNALING_URL", "ws://10.0.0.2:3000"),
            ("RTC_DEBUGGER_PROTOCOL", "binary"),
            ("RTC_DEBUGGER_AUTO_RECONNECT", "maybe"),
            ("RTC_DEBUGGER_DEBUG", "on"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| vars.get(k).map(|v| (*v).to_string()));

        assert_eq!(config.signaling.url, "ws://10.0.0.2:3000");
        assert_eq!(config.signaling.protocol, ProtocolMode::Binary);
        assert!(config.auto_reconnect);
        assert!(config.debug_mode);
    }

    #[test]
    fn test_http_relay_url_becomes_websocket() {
        let mut config = Config::default();
        config.apply_overrides(|k| {
            (k == "RTC_DEBUGGER_SIGNALING_URL").then(|| "https://relay.example.com".to_string())
        });
        assert_eq!(config.signaling.url, "wss://relay.example.com");

        let mut config = Config::default();
        config.signaling.url = "http://10.0.0.2:3000".to_string();
        config.apply_overrides(|_| None);
        assert_eq!(config.signaling.url, "ws://10.0.0.2:3000");
    }

    #[test]
    fn test_save_then_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.theme = "light".to_string();
        config.download_dir = Some(dir.path().join("downloads"));
        config.save(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("absent.json"))).is_err());
    }
}
