//! SSH transport for the SFTP backend

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use russh::client;
use russh::keys::PublicKey;
use tracing::{debug, info, warn};

use super::error::BackendError;
use super::known_hosts::{HostKeyVerification, KnownHostsStore};
use super::ConnectTarget;

/// Host key policy and russh callbacks
pub struct ClientHandler {
    host: String,
    port: u16,
    /// Reject unknown keys instead of trusting on first use.
    /// Changed keys are rejected either way.
    strict: bool,
    known_hosts: Arc<KnownHostsStore>,
}

impl ClientHandler {
    pub fn new(host: String, port: u16, strict: bool, known_hosts: Arc<KnownHostsStore>) -> Self {
        Self {
            host,
            port,
            strict,
            known_hosts,
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = BackendError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        match self
            .known_hosts
            .verify(&self.host, self.port, server_public_key)
        {
            HostKeyVerification::Verified => {
                info!("Host key verified for {}:{}", self.host, self.port);
                Ok(true)
            }
            HostKeyVerification::Unknown { fingerprint } if self.strict => {
                warn!(
                    "Unknown host key for {}:{} (fingerprint: {}), strict mode rejects it",
                    self.host, self.port, fingerprint
                );
                Err(BackendError::HostKeyRejected(format!(
                    "unknown host {}:{} with fingerprint {}",
                    self.host, self.port, fingerprint
                )))
            }
            HostKeyVerification::Unknown { fingerprint } => {
                info!(
                    "New host {}:{}, adding to known_hosts (fingerprint: {})",
                    self.host, self.port, fingerprint
                );
                if let Err(e) = self
                    .known_hosts
                    .add_host(&self.host, self.port, server_public_key)
                {
                    warn!("Failed to save host key: {}", e);
                }
                Ok(true)
            }
            HostKeyVerification::Changed {
                expected_fingerprint,
                actual_fingerprint,
            } => Err(BackendError::HostKeyRejected(format!(
                "key for {}:{} has changed (expected {}, got {}); \
                 remove the old entry from known_hosts if the change is legitimate",
                self.host, self.port, expected_fingerprint, actual_fingerprint
            ))),
        }
    }
}

/// Open and authenticate an SSH connection with password auth
pub async fn connect(
    target: &ConnectTarget,
    timeout: Duration,
    strict: bool,
    known_hosts: Arc<KnownHostsStore>,
) -> Result<client::Handle<ClientHandler>, BackendError> {
    let addr = target.addr();
    info!("Connecting to SSH server at {}", addr);

    let socket_addr = addr
        .to_socket_addrs()
        .map_err(|e| BackendError::ConnectionFailed(format!("Failed to resolve address: {}", e)))?
        .next()
        .ok_or_else(|| BackendError::ConnectionFailed("No address found".to_string()))?;

    let ssh_config = client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        ..Default::default()
    };

    let handler = ClientHandler::new(target.host.clone(), target.port, strict, known_hosts);

    let mut handle = tokio::time::timeout(
        timeout,
        client::connect(Arc::new(ssh_config), socket_addr, handler),
    )
    .await
    .map_err(|_| BackendError::Timeout(format!("Connection to {} timed out", addr)))??;

    debug!("SSH handshake completed");

    let auth = handle
        .authenticate_password(&target.username, target.password.expose())
        .await
        .map_err(|e| BackendError::AuthenticationFailed(e.to_string()))?;

    if !auth.success() {
        return Err(BackendError::AuthenticationFailed(
            "Authentication rejected by server".to_string(),
        ));
    }

    info!("SSH authentication successful for {}@{}", target.username, addr);
    Ok(handle)
}
