//! Configuration types

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current profiles file version
pub const CONFIG_VERSION: u32 = 1;

/// File-access protocol of a site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// SFTP over SSH
    #[default]
    Sftp,
    /// Plain FTP
    Ftp,
}

impl ProtocolKind {
    pub fn default_port(self) -> u16 {
        match self {
            ProtocolKind::Sftp => 22,
            ProtocolKind::Ftp => 21,
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::Sftp => write!(f, "SFTP"),
            ProtocolKind::Ftp => write!(f, "FTP"),
        }
    }
}

/// A saved connection profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: Uuid,
    /// Display name
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub protocol: ProtocolKind,
}

impl Site {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        protocol: ProtocolKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            host: host.into(),
            port,
            username: username.into(),
            protocol,
        }
    }

    /// Same endpoint and account, ignoring name and protocol
    pub fn same_endpoint(&self, host: &str, port: u16, username: &str) -> bool {
        self.host.eq_ignore_ascii_case(host) && self.port == port && self.username == username
    }
}

/// Session behaviour knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    /// Quiescence window for directory navigation
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Connect and socket read timeout, applied to both SFTP and FTP
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Reject unknown host keys instead of trusting them on first use
    #[serde(default)]
    pub strict_host_key_checking: bool,

    /// 0 = unlimited
    #[serde(default)]
    pub upload_limit_kbps: usize,

    /// 0 = unlimited
    #[serde(default)]
    pub download_limit_kbps: usize,
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    30
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            connect_timeout_secs: default_connect_timeout(),
            strict_host_key_checking: false,
            upload_limit_kbps: 0,
            download_limit_kbps: 0,
        }
    }
}

/// On-disk profiles file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilesFile {
    pub version: u32,
    #[serde(default)]
    pub sites: Vec<Site>,
    #[serde(default)]
    pub settings: SessionSettings,
}

impl Default for ProfilesFile {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            sites: Vec::new(),
            settings: SessionSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults_from_partial_json() {
        let settings: SessionSettings =
            serde_json::from_str(r#"{"uploadLimitKbps": 512}"#).unwrap();
        assert_eq!(settings.debounce_ms, 300);
        assert_eq!(settings.connect_timeout_secs, 30);
        assert_eq!(settings.upload_limit_kbps, 512);
        assert!(!settings.strict_host_key_checking);
    }

    #[test]
    fn test_site_protocol_serialization() {
        let site = Site::new("Box", "example.com", 21, "anon", ProtocolKind::Ftp);
        let json = serde_json::to_value(&site).unwrap();
        assert_eq!(json["protocol"], "ftp");
        assert_eq!(json["username"], "anon");

        let back: Site = serde_json::from_value(json).unwrap();
        assert_eq!(back, site);
    }

    #[test]
    fn test_same_endpoint() {
        let site = Site::new("Box", "Example.com", 22, "me", ProtocolKind::Sftp);
        assert!(site.same_endpoint("example.com", 22, "me"));
        assert!(!site.same_endpoint("example.com", 2222, "me"));
        assert!(!site.same_endpoint("example.com", 22, "you"));
    }
}
