//! SSH transport implementation using russh.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, trace, warn};
use regex::bytes::Regex;
use russh::client::{self, Handle, Msg};
use russh::keys::{PrivateKeyWithHashAlg, PublicKey, load_secret_key};
use russh::{Channel, ChannelMsg};
use secrecy::ExposeSecret;

use super::config::{AuthMethod, ConnectionParams, HostKeyVerification, SessionMode, SshOptions};
use super::{RawOutput, Session, Transport, scp};
use crate::channel::{Answer, PatternBuffer, normalize_output};
use crate::error::{Result, TransportError};

/// SSH transport wrapping the russh client.
#[derive(Debug, Clone)]
pub struct SshTransport {
    /// Options shared by every connection.
    options: SshOptions,

    /// Connect + authenticate timeout.
    timeout: Duration,
}

impl SshTransport {
    /// Create a transport with the given options.
    pub fn new(options: SshOptions, timeout: Duration) -> Self {
        Self { options, timeout }
    }

    /// Authenticate with the server.
    async fn authenticate(session: &mut Handle<SshHandler>, params: &ConnectionParams) -> Result<()> {
        let success = match &params.auth {
            AuthMethod::None => session
                .authenticate_none(&params.username)
                .await
                .map_err(TransportError::Ssh)?
                .success(),
            AuthMethod::Password(password) => session
                .authenticate_password(&params.username, password.expose_secret())
                .await
                .map_err(TransportError::Ssh)?
                .success(),
            AuthMethod::PrivateKey { path, passphrase } => {
                let key = load_secret_key(
                    path,
                    passphrase.as_ref().map(|p| p.expose_secret()),
                )
                .map_err(|e| TransportError::Key(format!("{}: {}", path.display(), e)))?;

                // Get the best RSA hash algorithm supported by the server
                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(TransportError::Ssh)?
                    .flatten();

                session
                    .authenticate_publickey(
                        &params.username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
                    .map_err(TransportError::Ssh)?
                    .success()
            }
        };

        if !success {
            return Err(TransportError::AuthenticationFailed {
                user: params.username.clone(),
            }
            .into());
        }

        Ok(())
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn open(&self, params: &ConnectionParams, mode: &SessionMode) -> Result<Box<dyn Session>> {
        let ssh_config = Arc::new(client::Config {
            keepalive_interval: Some(Duration::from_secs(15)),
            ..Default::default()
        });

        let host_key_error: Arc<Mutex<Option<TransportError>>> = Arc::new(Mutex::new(None));

        let handler = SshHandler {
            host: params.address.clone(),
            port: params.port,
            host_key_verification: self.options.host_key_verification.clone(),
            known_hosts_path: self.options.known_hosts_path.clone(),
            host_key_error: host_key_error.clone(),
        };

        debug!(
            "Connecting to {}@{} ({})",
            params.username,
            params.socket_addr(),
            params.auth.label()
        );

        let mut handle = tokio::time::timeout(
            self.timeout,
            client::connect(ssh_config, (params.address.as_str(), params.port), handler),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.timeout))?
        .map_err(|e| {
            // A detailed host key error beats the generic rejection
            let stored = host_key_error.lock().ok().and_then(|mut slot| slot.take());
            match (stored, e) {
                (Some(hk_err), _) => hk_err,
                (None, russh::Error::IO(source)) => TransportError::ConnectionFailed {
                    host: params.address.clone(),
                    port: params.port,
                    source,
                },
                (None, e) => TransportError::Ssh(e),
            }
        })?;

        tokio::time::timeout(self.timeout, Self::authenticate(&mut handle, params))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))??;

        debug!("Session to {} is open", params.socket_addr());

        Ok(Box::new(SshSession {
            handle,
            mode: mode.clone(),
            options: self.options.clone(),
            shell: None,
            address: params.address.clone(),
            closed: false,
        }))
    }
}

/// An authenticated SSH connection to one device.
pub struct SshSession {
    handle: Handle<SshHandler>,
    mode: SessionMode,
    options: SshOptions,
    shell: Option<ShellChannel>,
    address: String,
    closed: bool,
}

impl SshSession {
    /// Run a command on a fresh exec channel.
    async fn exec(&self, command: &str) -> Result<RawOutput> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;
        channel
            .exec(true, command)
            .await
            .map_err(TransportError::Ssh)?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, .. } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }

        Ok(RawOutput {
            output: String::from_utf8_lossy(&stdout).into_owned(),
            error: String::from_utf8_lossy(&stderr).into_owned(),
            exit_status,
        })
    }

    /// Get the shell channel, opening it and waiting for the first prompt
    /// on first use.
    async fn shell(&mut self, prompt: &Regex, timeout: Duration) -> Result<&mut ShellChannel> {
        if self.shell.is_none() {
            let channel = self
                .handle
                .channel_open_session()
                .await
                .map_err(TransportError::Ssh)?;
            channel
                .request_pty(
                    true,
                    "xterm",
                    self.options.terminal_width,
                    self.options.terminal_height,
                    0,
                    0,
                    &[],
                )
                .await
                .map_err(TransportError::Ssh)?;
            channel
                .request_shell(true)
                .await
                .map_err(TransportError::Ssh)?;

            let mut shell = ShellChannel {
                channel,
                buffer: PatternBuffer::new(self.options.search_depth),
                prompt: prompt.clone(),
            };
            let banner = shell.read_until_prompt(&[], timeout).await?;
            trace!("{}: initial prompt data {:?}", self.address, banner);
            self.shell = Some(shell);
        }

        self.shell
            .as_mut()
            .ok_or_else(|| TransportError::Disconnected.into())
    }

    async fn run(&mut self, command: &str, answers: &[Answer], timeout: Duration) -> Result<RawOutput> {
        match self.mode.clone() {
            SessionMode::Exec => {
                tokio::time::timeout(timeout, self.exec(command))
                    .await
                    .map_err(|_| TransportError::Timeout(timeout))?
            }
            SessionMode::Shell { prompt } => {
                let address = self.address.clone();
                let shell = self.shell(&prompt, timeout).await?;
                shell.send(command).await?;
                let raw = shell.read_until_prompt(answers, timeout).await?;
                let raw = String::from_utf8_lossy(&raw);
                trace!("{}: raw output for '{}': {:?}", address, command, raw);
                Ok(RawOutput::stdout(normalize_output(&raw, command)))
            }
        }
    }
}

#[async_trait]
impl Session for SshSession {
    async fn execute(&mut self, command: &str, timeout: Duration) -> Result<RawOutput> {
        self.run(command, &[], timeout).await
    }

    async fn execute_interactive(
        &mut self,
        command: &str,
        answers: &[Answer],
        timeout: Duration,
    ) -> Result<RawOutput> {
        self.run(command, answers, timeout).await
    }

    async fn transfer_file(&mut self, local: &Path, remote: &str, timeout: Duration) -> Result<()> {
        scp::upload(&self.handle, local, remote, timeout).await
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(shell) = self.shell.take() {
            if let Err(e) = shell.channel.close().await {
                debug!("{}: closing shell channel: {}", self.address, e);
            }
        }

        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(TransportError::Ssh)?;
        Ok(())
    }
}

/// PTY shell channel with prompt detection.
struct ShellChannel {
    channel: Channel<Msg>,
    buffer: PatternBuffer,
    prompt: Regex,
}

impl ShellChannel {
    /// Send a line of input.
    async fn send(&mut self, input: &str) -> Result<()> {
        self.channel
            .data(format!("{input}\n").as_bytes())
            .await
            .map_err(TransportError::Ssh)?;
        Ok(())
    }

    /// Read until the prompt appears at the tail of the buffer, answering
    /// any question matched by `answers` along the way.
    async fn read_until_prompt(&mut self, answers: &[Answer], timeout: Duration) -> Result<Vec<u8>> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;
        let mut scan_from = 0;

        loop {
            if self.buffer.tail_contains(&self.prompt) {
                trace!("prompt matched after {:?}", started.elapsed());
                return Ok(self.buffer.take());
            }

            if let Some(answer) = answers
                .iter()
                .find(|a| self.buffer.search_from(&a.pattern, scan_from).is_some())
            {
                debug!("answering '{}' with '{}'", answer.pattern.as_str(), answer.display_reply());
                scan_from = self.buffer.len();
                let reply = answer.reply.clone();
                self.send(&reply).await?;
                continue;
            }

            let msg = tokio::time::timeout_at(deadline, self.channel.wait())
                .await
                .map_err(|_| TransportError::Timeout(timeout))?;

            match msg {
                Some(ChannelMsg::Data { ref data }) => self.buffer.extend(data),
                Some(ChannelMsg::ExtendedData { ref data, .. }) => self.buffer.extend(data),
                Some(ChannelMsg::Eof | ChannelMsg::Close) | None => {
                    return Err(TransportError::Disconnected.into());
                }
                Some(_) => {}
            }
        }
    }
}

/// SSH client handler for russh.
struct SshHandler {
    host: String,
    port: u16,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    /// Stores a detailed host-key error so open() can surface it
    /// instead of the generic russh rejection.
    host_key_error: Arc<Mutex<Option<TransportError>>>,
}

impl SshHandler {
    /// Check the host key against known_hosts.
    ///
    /// Returns `Ok(true)` if matched, `Ok(false)` if host not found,
    /// `Err(TransportError::HostKeyChanged)` if the key changed.
    fn check_known_hosts(&self, pubkey: &PublicKey) -> std::result::Result<bool, TransportError> {
        let result = if let Some(ref path) = self.known_hosts_path {
            russh::keys::check_known_hosts_path(&self.host, self.port, pubkey, path)
        } else {
            russh::keys::check_known_hosts(&self.host, self.port, pubkey)
        };

        match result {
            Ok(matched) => Ok(matched),
            Err(russh::keys::Error::KeyChanged { line }) => Err(TransportError::HostKeyChanged {
                host: self.host.clone(),
                port: self.port,
                line,
            }),
            Err(e) => Err(TransportError::KnownHosts(e.to_string())),
        }
    }

    /// Save a new host key to known_hosts.
    fn learn_host_key(&self, pubkey: &PublicKey) -> std::result::Result<(), TransportError> {
        let result = if let Some(ref path) = self.known_hosts_path {
            russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, pubkey, path)
        } else {
            russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, pubkey)
        };

        result.map_err(|e| TransportError::KnownHosts(e.to_string()))
    }

    fn reject(&self, err: TransportError) -> bool {
        if let Ok(mut slot) = self.host_key_error.lock() {
            *slot = Some(err);
        }
        false
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match self.host_key_verification {
            HostKeyVerification::Disabled => Ok(true),

            HostKeyVerification::AcceptNew => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => {
                    if let Err(e) = self.learn_host_key(server_public_key) {
                        warn!("Failed to save host key for {}: {}", self.host, e);
                    }
                    Ok(true)
                }
                Err(e) => Ok(self.reject(e)),
            },

            HostKeyVerification::Strict => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => Ok(self.reject(TransportError::HostKeyUnknown {
                    host: self.host.clone(),
                    port: self.port,
                })),
                Err(e) => Ok(self.reject(e)),
            },
        }
    }
}
