//! Host key verification for the SFTP backend
//!
//! Reads and appends OpenSSH-style `known_hosts` lines:
//! `host keytype base64key`, with `[host]:port` for non-standard ports.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parking_lot::RwLock;
use russh::keys::{PublicKey, PublicKeyBase64};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::error::BackendError;

#[derive(Debug, Clone, PartialEq)]
pub enum HostKeyVerification {
    Verified,
    /// First connection to this host (or to this key type)
    Unknown { fingerprint: String },
    /// Stored key differs from the one presented
    Changed {
        expected_fingerprint: String,
        actual_fingerprint: String,
    },
}

#[derive(Clone, Debug)]
struct HostKeyEntry {
    key_type: String,
    key_data: String,
}

pub struct KnownHostsStore {
    hosts: RwLock<HashMap<String, Vec<HostKeyEntry>>>,
    path: PathBuf,
}

impl Default for KnownHostsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KnownHostsStore {
    /// Load from `~/.ssh/known_hosts`
    pub fn new() -> Self {
        let path = dirs::home_dir()
            .map(|h| h.join(".ssh").join("known_hosts"))
            .unwrap_or_else(|| PathBuf::from(".ssh/known_hosts"));
        Self::with_path(path)
    }

    pub fn with_path(path: PathBuf) -> Self {
        let store = Self {
            hosts: RwLock::new(HashMap::new()),
            path,
        };
        match fs::read_to_string(&store.path) {
            Ok(contents) => store.load_lines(&contents),
            Err(e) => debug!("known_hosts not loaded from {:?}: {}", store.path, e),
        }
        store
    }

    fn load_lines(&self, contents: &str) {
        let mut hosts = self.hosts.write();
        let mut entry_count = 0;

        for line in contents.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(hostnames), Some(key_type), Some(key_data)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let entry = HostKeyEntry {
                key_type: key_type.to_string(),
                key_data: key_data.to_string(),
            };
            // Hashed hostnames (|1|...) cannot be matched without the salt
            for hostname in hostnames.split(',').filter(|h| !h.starts_with('|')) {
                hosts
                    .entry(Self::normalize_hostname(hostname))
                    .or_default()
                    .push(entry.clone());
                entry_count += 1;
            }
        }

        info!(
            "Loaded {} known host entries ({} unique hosts)",
            entry_count,
            hosts.len()
        );
    }

    /// Lookup key for a `known_hosts` host field, same shape as `make_key`.
    /// `[host]:22` collapses to `host`; other ports keep their brackets.
    fn normalize_hostname(host: &str) -> String {
        let Some(rest) = host.strip_prefix('[') else {
            return host.to_lowercase();
        };
        match rest.split_once("]:") {
            Some((name, port)) => match port.parse::<u16>() {
                Ok(port) => Self::make_key(name, port),
                Err(_) => host.to_lowercase(),
            },
            None => rest.trim_end_matches(']').to_lowercase(),
        }
    }

    /// Key written to the file for `host:port`
    fn make_key(host: &str, port: u16) -> String {
        let host = host.to_lowercase();
        if port == 22 {
            host
        } else {
            format!("[{}]:{}", host, port)
        }
    }

    /// SHA256 fingerprint, OpenSSH style
    pub fn fingerprint(key: &PublicKey) -> String {
        fingerprint_bytes(&key.public_key_bytes())
    }

    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> HostKeyVerification {
        let actual_b64 = BASE64.encode(key.public_key_bytes());
        let actual_type = key.algorithm().as_str().to_string();
        let fingerprint = Self::fingerprint(key);

        let host_key = Self::make_key(host, port);
        let hosts = self.hosts.read();
        let Some(entries) = hosts.get(&host_key) else {
            debug!("Unknown host: {}", host_key);
            return HostKeyVerification::Unknown { fingerprint };
        };

        match entries.iter().find(|e| e.key_type == actual_type) {
            Some(entry) if entry.key_data == actual_b64 => HostKeyVerification::Verified,
            Some(entry) => {
                let expected_fingerprint = BASE64
                    .decode(&entry.key_data)
                    .map(|bytes| fingerprint_bytes(&bytes))
                    .unwrap_or_else(|_| "unknown".to_string());
                warn!(
                    "Host key changed for {}:{} (type: {})! Expected {}, got {}",
                    host, port, actual_type, expected_fingerprint, fingerprint
                );
                HostKeyVerification::Changed {
                    expected_fingerprint,
                    actual_fingerprint: fingerprint,
                }
            }
            None => {
                debug!("Host {} known but no {} key stored", host_key, actual_type);
                HostKeyVerification::Unknown { fingerprint }
            }
        }
    }

    /// Remember a key in memory and append it to the file
    pub fn add_host(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), BackendError> {
        let key_b64 = BASE64.encode(key.public_key_bytes());
        let key_type = key.algorithm().as_str().to_string();
        let host_key = Self::make_key(host, port);

        self.hosts
            .write()
            .entry(host_key.clone())
            .or_default()
            .push(HostKeyEntry {
                key_type: key_type.clone(),
                key_data: key_b64.clone(),
            });

        let line = format!("{} {} {}", host_key, key_type, key_b64);
        self.append_line(&line)?;

        info!("Added {} host key for {}:{} to known_hosts", key_type, host, port);
        Ok(())
    }

    fn append_line(&self, line: &str) -> Result<(), BackendError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

fn fingerprint_bytes(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_hostname() {
        assert_eq!(KnownHostsStore::normalize_hostname("github.com"), "github.com");
        assert_eq!(KnownHostsStore::normalize_hostname("[GitHub.com]:22"), "github.com");
        assert_eq!(
            KnownHostsStore::normalize_hostname("[Files.example.com]:2222"),
            "[files.example.com]:2222"
        );
    }

    #[test]
    fn test_make_key() {
        assert_eq!(KnownHostsStore::make_key("nas.local", 22), "nas.local");
        assert_eq!(KnownHostsStore::make_key("NAS.local", 2222), "[nas.local]:2222");
    }

    #[test]
    fn test_load_skips_comments_and_hashed_hosts() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("known_hosts");
        std::fs::write(
            &path,
            "# comment\n\
             |1|salt|hash ssh-ed25519 AAAA\n\
             nas.local,10.0.0.5 ssh-ed25519 AAAAC3Nz\n\
             [files.example.com]:2222 ssh-rsa AAAAB3Nz\n\
             broken-line\n",
        )
        .unwrap();

        let store = KnownHostsStore::with_path(path);
        let hosts = store.hosts.read();
        assert_eq!(hosts.len(), 3);
        assert!(hosts.contains_key("nas.local"));
        assert!(hosts.contains_key("10.0.0.5"));
        assert_eq!(hosts["[files.example.com]:2222"][0].key_type, "ssh-rsa");
        assert!(!hosts.contains_key("files.example.com"));
    }

    const KEY_A: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8g";
    const KEY_B: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAIDBAUGBwgJCgsMDQ4PEBESExQVFhcYGRobHB0eHyAh";

    fn public_key(line: &str) -> PublicKey {
        PublicKey::from_openssh(line).unwrap()
    }

    #[test]
    fn test_keys_are_matched_per_port() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("known_hosts");
        std::fs::write(&path, format!("[nas.local]:2222 {}\n", KEY_A)).unwrap();
        let store = KnownHostsStore::with_path(path);

        // Port 22 on the same host has never been seen
        assert!(matches!(
            store.verify("nas.local", 22, &public_key(KEY_B)),
            HostKeyVerification::Unknown { .. }
        ));
        assert_eq!(
            store.verify("NAS.local", 2222, &public_key(KEY_A)),
            HostKeyVerification::Verified
        );
        assert!(matches!(
            store.verify("nas.local", 2222, &public_key(KEY_B)),
            HostKeyVerification::Changed { .. }
        ));
    }

    #[test]
    fn test_added_host_is_written_with_port() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("ssh").join("known_hosts");
        let store = KnownHostsStore::with_path(path.clone());

        store.add_host("nas.local", 2222, &public_key(KEY_A)).unwrap();
        assert_eq!(
            store.verify("nas.local", 2222, &public_key(KEY_A)),
            HostKeyVerification::Verified
        );
        assert!(matches!(
            store.verify("nas.local", 22, &public_key(KEY_A)),
            HostKeyVerification::Unknown { .. }
        ));

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("[nas.local]:2222 ssh-ed25519 "));

        // A fresh store reads back the same entry
        let reloaded = KnownHostsStore::with_path(path);
        assert_eq!(
            reloaded.verify("nas.local", 2222, &public_key(KEY_A)),
            HostKeyVerification::Verified
        );
    }

    #[test]
    fn test_fingerprint_format() {
        let fp = fingerprint_bytes(b"key material");
        assert!(fp.starts_with("SHA256:"));
        assert!(!fp.ends_with('='));
    }
}
