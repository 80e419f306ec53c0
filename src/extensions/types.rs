//! Extension configuration schema
//!
//! The processes these sections describe (ttyd web terminal, gostc NAT
//! traversal, easytier VPN) are started and supervised outside this crate.
//! These types only give the config store a place to persist and round-trip
//! their settings for whatever external supervisor reads them.

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

/// ttyd configuration (Web Terminal)
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtydConfig {
    /// Enable auto-start
    pub enabled: bool,
    /// Port to listen on
    pub port: u16,
    /// Shell to execute
    pub shell: String,
    /// Credential in format "user:password" (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl Default for TtydConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 7681,
            shell: "/bin/bash".to_string(),
            credential: None,
        }
    }
}

/// gostc configuration (NAT traversal based on FRP)
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GostcConfig {
    /// Enable auto-start
    pub enabled: bool,
    /// Server address (e.g., gostc.mofeng.run)
    pub addr: String,
    /// Client key from GOSTC management panel
    #[serde(skip_serializing_if = "String::is_empty")]
    pub key: String,
    /// Enable TLS
    pub tls: bool,
}

impl Default for GostcConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "gostc.mofeng.run".to_string(),
            key: String::new(),
            tls: true,
        }
    }
}

/// EasyTier configuration (P2P VPN)
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EasytierConfig {
    /// Enable auto-start
    pub enabled: bool,
    /// Network name
    pub network_name: String,
    /// Network secret/password
    #[serde(skip_serializing_if = "String::is_empty")]
    pub network_secret: String,
    /// Peer node URLs
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub peer_urls: Vec<String>,
    /// Virtual IP address (optional, auto-assigned if not set)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_ip: Option<String>,
}

impl Default for EasytierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            network_name: String::new(),
            network_secret: String::new(),
            peer_urls: Vec::new(),
            virtual_ip: None,
        }
    }
}

/// Combined extensions configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExtensionsConfig {
    pub ttyd: TtydConfig,
    pub gostc: GostcConfig,
    pub easytier: EasytierConfig,
}
