use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use config_file::FromConfigFile;
use serde::Deserialize;

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// UDP port of the strand controller.
    pub port: u16,
    /// Used until a host has been persisted.
    pub default_host: String,
    pub host_file: PathBuf,
    /// Receivers of the OSC frame stream.
    pub stream_targets: Vec<SocketAddr>,
    /// Wall-clock budget of a single script call.
    pub watermark_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            port: 1337,
            default_host: "127.0.0.1".to_string(),
            host_file: PathBuf::from("strand-ip.conf"),
            stream_targets: Vec::new(),
            watermark_ms: 100,
        }
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Settings {
        let Some(path) = path else {
            return Settings::default();
        };

        match Settings::from_config_file(path) {
            Ok(settings) => settings,
            Err(err) => {
                log::warn!("Cannot read {}, using defaults: {}", path.display(), err);
                Settings::default()
            }
        }
    }
}
