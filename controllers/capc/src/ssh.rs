//! SSH access to provisioned instances.
//!
//! After an instance reports `running` the machine reconciler logs in as the
//! image's default user with the cluster key, removes the default route the
//! image installs on the private interface, and reads the cloud-init state.
//! Each reconcile pass runs at most one short SSH check; waiting happens through
//! requeues, never inside a session.

use crate::error::ControllerError;
use async_trait::async_trait;
use russh::client;
use russh::{ChannelMsg, Disconnect};
use russh_keys::key;
use ssh_key::{Algorithm, LineEnding, PrivateKey};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const SSH_PORT: u16 = 22;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Drop the default route on the private interface, then report cloud-init state
pub const CLOUD_INIT_STATUS_COMMAND: &str =
    "sudo ip route del default dev eth1 2>/dev/null || true; cloud-init status";

#[derive(Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub private_key_pem: String,
}

impl std::fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_status: Option<u32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs one command on a guest
#[async_trait]
pub trait GuestShell: Send + Sync {
    async fn run(
        &self,
        target: &SshTarget,
        command: &str,
    ) -> Result<CommandOutput, ControllerError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudInitState {
    Done,
    Running,
    Error(String),
    Unknown(String),
}

/// Interpret `cloud-init status` output
pub fn parse_cloud_init_status(output: &CommandOutput) -> CloudInitState {
    let status = output
        .stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix("status:"))
        .map(|s| s.trim().to_string());

    match status.as_deref() {
        Some("done") => CloudInitState::Done,
        Some("running") | Some("not started") | Some("not run") => CloudInitState::Running,
        Some("error") => {
            let detail = if output.stderr.trim().is_empty() {
                output.stdout.trim().to_string()
            } else {
                output.stderr.trim().to_string()
            };
            CloudInitState::Error(detail)
        }
        Some(other) => CloudInitState::Unknown(other.to_string()),
        None => CloudInitState::Unknown(format!(
            "no status in output (exit {:?}): {}",
            output.exit_status,
            output.stdout.trim()
        )),
    }
}

struct TrustOnFirstUse;

#[async_trait]
impl client::Handler for TrustOnFirstUse {
    type Error = russh::Error;

    // Freshly installed guests have no known host key yet.
    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// [`GuestShell`] over russh
#[derive(Debug, Clone, Default)]
pub struct RusshShell;

impl RusshShell {
    async fn exec(
        &self,
        target: &SshTarget,
        command: &str,
    ) -> Result<CommandOutput, ControllerError> {
        let key_pair = russh_keys::decode_secret_key(&target.private_key_pem, None)?;

        let config = Arc::new(client::Config {
            inactivity_timeout: Some(COMMAND_TIMEOUT),
            ..Default::default()
        });

        let mut session = tokio::time::timeout(
            CONNECT_TIMEOUT,
            client::connect(config, (target.host.as_str(), target.port), TrustOnFirstUse),
        )
        .await
        .map_err(|_| {
            ControllerError::Ssh(format!("connect to {}:{} timed out", target.host, target.port))
        })??;

        if !session.authenticate_publickey(&target.user, Arc::new(key_pair)).await? {
            return Err(ControllerError::Ssh(format!(
                "public key rejected for {}@{}",
                target.user, target.host
            )));
        }

        let mut channel = session.channel_open_session().await?;
        channel.exec(true, command).await?;

        let mut output = CommandOutput::default();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => output.exit_status = Some(exit_status),
                _ => {}
            }
        }
        output.stdout = String::from_utf8_lossy(&stdout).into_owned();
        output.stderr = String::from_utf8_lossy(&stderr).into_owned();

        let _ = session.disconnect(Disconnect::ByApplication, "", "en").await;
        Ok(output)
    }
}

#[async_trait]
impl GuestShell for RusshShell {
    async fn run(
        &self,
        target: &SshTarget,
        command: &str,
    ) -> Result<CommandOutput, ControllerError> {
        debug!("SSH {}@{}:{}: {}", target.user, target.host, target.port, command);
        tokio::time::timeout(COMMAND_TIMEOUT + CONNECT_TIMEOUT, self.exec(target, command))
            .await
            .map_err(|_| ControllerError::Ssh(format!("command on {} timed out", target.host)))?
    }
}

/// OpenSSH-encoded key pair
#[derive(Clone)]
pub struct GeneratedKeyPair {
    pub private_key_openssh: String,
    pub public_key_openssh: String,
}

/// Generate an RSA key pair for a cluster
pub fn generate_key_pair() -> Result<GeneratedKeyPair, ControllerError> {
    let private = PrivateKey::random(&mut rand_core::OsRng, Algorithm::Rsa { hash: None })
        .map_err(|e| ControllerError::KeyGeneration(e.to_string()))?;
    let private_key_openssh = private
        .to_openssh(LineEnding::LF)
        .map_err(|e| ControllerError::KeyGeneration(e.to_string()))?
        .to_string();
    let public_key_openssh = private
        .public_key()
        .to_openssh()
        .map_err(|e| ControllerError::KeyGeneration(e.to_string()))?;

    Ok(GeneratedKeyPair {
        private_key_openssh,
        public_key_openssh,
    })
}
