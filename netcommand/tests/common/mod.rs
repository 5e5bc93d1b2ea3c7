//! Scripted in-memory transport for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use netcommand::config::{BatchConfig, Timeouts};
use netcommand::error::{Result, TransportError};
use netcommand::inventory::{CredentialOverrides, Inventory};
use netcommand::transport::{ConnectionParams, RawOutput, Session, SessionMode, Transport};

/// What the device does when it receives a command.
#[derive(Debug, Clone)]
pub enum Reply {
    Output(String),
    Stderr(String),
    Slow(Duration, String),
    Disconnect,
    Hang,
}

/// Something a test device saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open(String),
    Execute(String, String),
    Transfer(String, String),
    Close(String),
}

/// Scripted behavior of one device.
///
/// Each command has a queue of replies; the last reply repeats. Commands
/// without a script get empty output.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    replies: HashMap<String, VecDeque<Reply>>,
    reject_auth: bool,
    refuse_connections: u32,
    panic_on_open: bool,
    open_delay: Option<Duration>,
    interrupt_transfers: bool,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, command: &str, output: &str) -> Self {
        self.reply_with(command, Reply::Output(output.to_string()))
    }

    pub fn reply_with(mut self, command: &str, reply: Reply) -> Self {
        self.replies.entry(command.to_string()).or_default().push_back(reply);
        self
    }

    pub fn reject_auth(mut self) -> Self {
        self.reject_auth = true;
        self
    }

    pub fn refuse_connections(mut self, times: u32) -> Self {
        self.refuse_connections = times;
        self
    }

    pub fn panic_on_open(mut self) -> Self {
        self.panic_on_open = true;
        self
    }

    pub fn open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Every file transfer breaks off before completing.
    pub fn interrupt_transfers(mut self) -> Self {
        self.interrupt_transfers = true;
        self
    }

    fn next_reply(&mut self, command: &str) -> Reply {
        match self.replies.get_mut(command) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or(Reply::Output(String::new())),
            None => Reply::Output(String::new()),
        }
    }
}

type Devices = Arc<Mutex<HashMap<String, MockDevice>>>;

#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Transport whose devices follow a script and record what they saw.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    devices: Devices,
    events: Arc<Mutex<Vec<Event>>>,
    counters: Arc<Counters>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(self, host: &str, device: MockDevice) -> Self {
        self.devices.lock().unwrap().insert(host.to_string(), device);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Number of connection attempts.
    pub fn opened(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Open(_)))
            .count()
    }

    /// Commands executed on `host`, in order.
    pub fn executed(&self, host: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Execute(h, command) if h == host => Some(command),
                _ => None,
            })
            .collect()
    }

    /// Remote names of all file transfers.
    pub fn transfers(&self) -> Vec<(String, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Transfer(host, remote) => Some((host, remote)),
                _ => None,
            })
            .collect()
    }

    pub fn closed(&self, host: &str) -> bool {
        self.events().contains(&Event::Close(host.to_string()))
    }

    /// Highest number of sessions open at the same time.
    pub fn peak_sessions(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, params: &ConnectionParams, _mode: &SessionMode) -> Result<Box<dyn Session>> {
        let host = params.address.clone();
        self.record(Event::Open(host.clone()));

        let (delay, panic, refuse, reject) = {
            let mut devices = self.devices.lock().unwrap();
            let Some(device) = devices.get_mut(&host) else {
                return Err(TransportError::ConnectionFailed {
                    host,
                    port: params.port,
                    source: io::Error::new(io::ErrorKind::NotFound, "no such test device"),
                }
                .into());
            };
            let refuse = device.refuse_connections > 0;
            device.refuse_connections = device.refuse_connections.saturating_sub(1);
            (device.open_delay, device.panic_on_open, refuse, device.reject_auth)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if panic {
            panic!("scripted panic for {host}");
        }
        if refuse {
            return Err(TransportError::ConnectionFailed {
                host,
                port: params.port,
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
            }
            .into());
        }
        if reject {
            return Err(TransportError::AuthenticationFailed {
                user: params.username.clone(),
            }
            .into());
        }

        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(active, Ordering::SeqCst);

        Ok(Box::new(MockSession {
            host,
            transport: self.clone(),
            closed: false,
        }))
    }
}

struct MockSession {
    host: String,
    transport: MockTransport,
    closed: bool,
}

#[async_trait]
impl Session for MockSession {
    async fn execute(&mut self, command: &str, _timeout: Duration) -> Result<RawOutput> {
        if self.closed {
            return Err(TransportError::Disconnected.into());
        }
        self.transport
            .record(Event::Execute(self.host.clone(), command.to_string()));

        let reply = {
            let mut devices = self.transport.devices.lock().unwrap();
            devices
                .get_mut(&self.host)
                .map(|device| device.next_reply(command))
                .unwrap_or(Reply::Output(String::new()))
        };

        match reply {
            Reply::Output(output) => Ok(RawOutput::stdout(output)),
            Reply::Stderr(error) => Ok(RawOutput {
                error,
                ..RawOutput::default()
            }),
            Reply::Slow(delay, output) => {
                tokio::time::sleep(delay).await;
                Ok(RawOutput::stdout(output))
            }
            Reply::Disconnect => {
                self.close().await?;
                Err(TransportError::Disconnected.into())
            }
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(RawOutput::default())
            }
        }
    }

    async fn transfer_file(&mut self, local: &Path, remote: &str, _timeout: Duration) -> Result<()> {
        self.transport
            .record(Event::Transfer(self.host.clone(), remote.to_string()));

        let interrupt = self
            .transport
            .devices
            .lock()
            .unwrap()
            .get(&self.host)
            .is_some_and(|device| device.interrupt_transfers);
        if interrupt {
            return Err(TransportError::TransferInterrupted {
                path: local.to_path_buf(),
                message: "channel closed after 4096 of 1048576 bytes".to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.transport.counters.active.fetch_sub(1, Ordering::SeqCst);
            self.transport.record(Event::Close(self.host.clone()));
        }
        Ok(())
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            self.transport.counters.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Timeouts short enough for tests.
pub fn fast_timeouts() -> Timeouts {
    Timeouts {
        connect: Duration::from_secs(2),
        command: Duration::from_secs(2),
        transfer: Duration::from_secs(5),
        install: Duration::from_secs(5),
        poll_interval: Duration::from_millis(10),
        reboot_grace: Duration::from_millis(10),
        reconnect: Duration::from_secs(2),
    }
}

pub fn fast_config() -> BatchConfig {
    BatchConfig::default().with_timeouts(fast_timeouts())
}

pub fn inventory(yaml: &str) -> Inventory {
    Inventory::from_yaml(yaml, &CredentialOverrides::default()).unwrap()
}
