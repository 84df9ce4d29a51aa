// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! YAML configuration shared by the gateway and the client binary.
//!
//! Every setting has a default, so an empty (or absent) file yields a
//! working local setup. The file is either given explicitly on the command
//! line or searched as `<tool>.yml` in `./config`, `/etc` and
//! `/etc/call-api`.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Directories searched for `<tool>.yml` when no path is given.
const SEARCH_DIRS: &[&str] = &["./config", "/etc", "/etc/call-api"];

/// The whole configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Where the gateway accepts WebSocket clients.
    #[serde(default)]
    pub ws_server: WsServerConfig,
    /// How to reach the SIP proxy's management interface.
    #[serde(default)]
    pub mi: MiConfig,
    /// Log output settings.
    #[serde(default)]
    pub log: LogConfig,
    /// SIP-level settings.
    #[serde(default)]
    pub sip: SipConfig,
}

/// The `ws_server` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WsServerConfig {
    /// Interface to listen on.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// HTTP path upgraded to WebSocket.
    #[serde(default = "default_http_path")]
    pub http_path: String,
}

impl Default for WsServerConfig {
    fn default() -> Self {
        WsServerConfig {
            host: default_host(),
            port: default_port(),
            http_path: default_http_path(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_owned()
}

fn default_port() -> u16 {
    5059
}

fn default_http_path() -> String {
    "/ws".to_owned()
}

/// The `mi` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MiConfig {
    /// `host:port` of the management interface. Defaults to
    /// [`crate::mi::DEFAULT_URL`].
    #[serde(default)]
    pub url: Option<String>,
}

/// The `log` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// Append logs to this file rather than stderr.
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    /// Log level directive, e.g. `info` or `call_api=debug`.
    #[serde(default)]
    pub level: Option<String>,
}

/// The `sip` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SipConfig {
    /// Outbound next-hop URI handed to `t_uac_dlg` when starting calls.
    #[serde(default)]
    pub uri: Option<String>,
}

/// Failure to locate, read or parse the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Read {
        /// The file we tried to read.
        path: PathBuf,
        /// What went wrong reading it.
        source: std::io::Error,
    },
    /// The file is not valid YAML for [`Config`].
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        /// The file we tried to parse.
        path: PathBuf,
        /// What went wrong parsing it.
        source: serde_yaml::Error,
    },
    /// The path points at a directory.
    #[error("'{0}' is a directory, not a normal file")]
    IsDirectory(PathBuf),
}

impl Config {
    /// Read and parse the file at `path`.
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        if path.is_dir() {
            return Err(ConfigError::IsDirectory(path.to_owned()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Load the configuration for `tool`: from `path` when given, otherwise
    /// from the first `<tool>.yml` found in the default locations, otherwise
    /// all defaults.
    pub fn load(path: Option<&Path>, tool: &str) -> Result<Config, ConfigError> {
        if let Some(path) = path {
            return Config::from_file(path);
        }
        for dir in SEARCH_DIRS {
            let candidate = Path::new(dir).join(format!("{tool}.yml"));
            if candidate.is_file() {
                return Config::from_file(&candidate);
            }
        }
        Ok(Config::default())
    }
}
