//! Inventory loading.
//!
//! The inventory is a YAML document of nested groups and hosts. Options
//! cascade from the top level through every enclosing group down to the
//! host, and a host is a member of each group it is nested in.

mod selection;

pub use selection::{SelectionFilter, resolve};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use log::debug;
use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{InventoryError, Result};
use crate::image::ImageSource;
use crate::transport::{AuthMethod, ConnectionParams};

/// Key under `images:` that applies to every model.
pub const DEFAULT_IMAGE_KEY: &str = "default";

/// Environment variable overriding the SSH password.
pub const PASSWORD_ENV: &str = "NETCOMMAND_PASSWORD";

/// Environment variable overriding the SSH key passphrase.
pub const KEY_PASSPHRASE_ENV: &str = "NETCOMMAND_SSH_KEY_PASSWORD";

/// One managed device, immutable once built.
#[derive(Debug)]
pub struct DeviceDescriptor {
    /// Inventory name, unique within the inventory.
    pub hostname: String,

    /// Groups the host belongs to, outermost first.
    pub groups: Vec<String>,

    /// Driver model key.
    pub model: String,

    /// How to reach the device.
    pub connection: ConnectionParams,

    /// Hardware platform used in image filenames.
    pub platform: Option<String>,

    /// Image source for the model, with any per-host directory applied.
    pub image_source: Option<Arc<ImageSource>>,

    /// Password for privileged mode.
    pub enable_password: Option<SecretString>,
}

/// Credentials that take precedence over inventory values.
#[derive(Debug, Default)]
pub struct CredentialOverrides {
    pub password: Option<SecretString>,
    pub key_passphrase: Option<SecretString>,
}

impl CredentialOverrides {
    /// Overrides from `NETCOMMAND_PASSWORD` and `NETCOMMAND_SSH_KEY_PASSWORD`.
    pub fn from_env() -> Self {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .map(SecretString::from)
        };
        Self {
            password: read(PASSWORD_ENV),
            key_passphrase: read(KEY_PASSPHRASE_ENV),
        }
    }
}

/// Loaded inventory.
#[derive(Debug, Default)]
pub struct Inventory {
    devices: Vec<Arc<DeviceDescriptor>>,
    groups: IndexMap<String, Vec<String>>,
}

impl Inventory {
    /// Load an inventory file.
    pub fn load(path: impl AsRef<Path>, overrides: &CredentialOverrides) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| InventoryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text, overrides)
    }

    /// Parse an inventory document.
    pub fn from_yaml(text: &str, overrides: &CredentialOverrides) -> Result<Self> {
        let doc: InventoryDoc = serde_yaml::from_str(text).map_err(InventoryError::Parse)?;

        let mut collector = Collector::default();
        collector.walk(&doc.root, &[], &HostOptions::default());

        let images: IndexMap<String, Arc<ImageSource>> = doc
            .images
            .into_iter()
            .map(|(model, source)| (model, Arc::new(source.into_source())))
            .collect();

        let mut devices = Vec::with_capacity(collector.hosts.len());
        for (name, pending) in collector.hosts {
            devices.push(Arc::new(build_device(name, pending, &images, overrides)?));
        }

        debug!(
            "Loaded inventory: {} host(s), {} group(s)",
            devices.len(),
            collector.groups.len()
        );

        Ok(Self {
            devices,
            groups: collector.groups,
        })
    }

    /// All devices, in inventory order.
    pub fn devices(&self) -> &[Arc<DeviceDescriptor>] {
        &self.devices
    }

    /// Look up a device by hostname.
    pub fn device(&self, hostname: &str) -> Option<&Arc<DeviceDescriptor>> {
        self.devices.iter().find(|d| d.hostname == hostname)
    }

    /// Whether a group with this name exists.
    pub fn has_group(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    /// Member hostnames of a group, in inventory order.
    pub fn group_members(&self, name: &str) -> Option<&[String]> {
        self.groups.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[derive(Deserialize, Default)]
struct InventoryDoc {
    #[serde(flatten)]
    root: GroupDoc,

    #[serde(default)]
    images: IndexMap<String, ImageSourceDoc>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct GroupDoc {
    opts: HostOptions,
    groups: IndexMap<String, Option<GroupDoc>>,
    hosts: IndexMap<String, Option<HostOptions>>,
}

/// Options valid at any level of the document.
#[derive(Deserialize, Default, Clone)]
#[serde(default, deny_unknown_fields)]
struct HostOptions {
    hostname: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    ssh_key: Option<String>,
    ssh_key_password: Option<String>,
    enable_password: Option<String>,
    model: Option<String>,
    platform: Option<String>,
    image_dir: Option<String>,
    groups: Option<Vec<String>>,
}

impl HostOptions {
    /// `other` on top of `self`.
    fn overlay(&self, other: &HostOptions) -> HostOptions {
        fn pick<T: Clone>(top: &Option<T>, base: &Option<T>) -> Option<T> {
            top.as_ref().or(base.as_ref()).cloned()
        }
        HostOptions {
            hostname: pick(&other.hostname, &self.hostname),
            port: other.port.or(self.port),
            username: pick(&other.username, &self.username),
            password: pick(&other.password, &self.password),
            ssh_key: pick(&other.ssh_key, &self.ssh_key),
            ssh_key_password: pick(&other.ssh_key_password, &self.ssh_key_password),
            enable_password: pick(&other.enable_password, &self.enable_password),
            model: pick(&other.model, &self.model),
            platform: pick(&other.platform, &self.platform),
            image_dir: pick(&other.image_dir, &self.image_dir),
            groups: pick(&other.groups, &self.groups),
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct ImageSourceDoc {
    directory: Option<String>,
    url: Option<String>,
    filename: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

impl ImageSourceDoc {
    fn into_source(self) -> ImageSource {
        ImageSource {
            directory: self.directory.map(|d| expand_home(&d)),
            url: self.url,
            filename: self.filename,
            username: self.username,
            password: self.password.map(|p| Arc::new(SecretString::from(p))),
        }
    }
}

struct PendingHost {
    opts: HostOptions,
    groups: Vec<String>,
}

#[derive(Default)]
struct Collector {
    hosts: IndexMap<String, PendingHost>,
    groups: IndexMap<String, Vec<String>>,
}

impl Collector {
    /// Nested groups are visited before the hosts declared at the same level.
    fn walk(&mut self, group: &GroupDoc, path: &[String], parent: &HostOptions) {
        let opts = parent.overlay(&group.opts);

        for (name, child) in &group.groups {
            let mut child_path = path.to_vec();
            child_path.push(name.clone());
            self.groups.entry(name.clone()).or_default();
            match child {
                Some(child) => self.walk(child, &child_path, &opts),
                None => self.walk(&GroupDoc::default(), &child_path, &opts),
            }
        }

        for (name, host) in &group.hosts {
            let host_opts = match host {
                Some(host) => opts.overlay(host),
                None => opts.clone(),
            };

            let mut memberships = path.to_vec();
            memberships.extend(host_opts.groups.iter().flatten().cloned());

            for group in &memberships {
                let members = self.groups.entry(group.clone()).or_default();
                if !members.contains(name) {
                    members.push(name.clone());
                }
            }

            match self.hosts.get_mut(name) {
                Some(existing) => {
                    debug!("Host '{}' declared again, keeping first definition", name);
                    for group in memberships {
                        if !existing.groups.contains(&group) {
                            existing.groups.push(group);
                        }
                    }
                }
                None => {
                    let mut seen = HashSet::new();
                    memberships.retain(|g| seen.insert(g.clone()));
                    self.hosts.insert(
                        name.clone(),
                        PendingHost {
                            opts: host_opts,
                            groups: memberships,
                        },
                    );
                }
            }
        }
    }
}

fn build_device(
    name: String,
    pending: PendingHost,
    images: &IndexMap<String, Arc<ImageSource>>,
    overrides: &CredentialOverrides,
) -> Result<DeviceDescriptor> {
    let PendingHost { opts, groups } = pending;

    let model = opts
        .model
        .ok_or_else(|| InventoryError::MissingModel { host: name.clone() })?;

    let password = match &overrides.password {
        Some(secret) => Some(secret.clone()),
        None => opts.password.map(SecretString::from),
    };
    let passphrase = match &overrides.key_passphrase {
        Some(secret) => Some(secret.clone()),
        None => opts.ssh_key_password.map(SecretString::from),
    };

    let auth = match (opts.ssh_key, password) {
        (Some(key), _) => AuthMethod::PrivateKey {
            path: expand_home(&key),
            passphrase,
        },
        (None, Some(password)) => AuthMethod::Password(password),
        (None, None) => AuthMethod::None,
    };

    let connection = ConnectionParams {
        address: opts.hostname.unwrap_or_else(|| name.clone()),
        port: opts.port.unwrap_or(22),
        username: opts.username.unwrap_or_else(|| "admin".to_string()),
        auth,
    };

    let base_source = images
        .get(&model)
        .or_else(|| images.get(DEFAULT_IMAGE_KEY))
        .cloned();
    let image_source = match opts.image_dir {
        Some(dir) => {
            let directory = expand_home(&dir);
            Some(Arc::new(match &base_source {
                Some(source) => source.with_directory(directory),
                None => ImageSource {
                    directory: Some(directory),
                    ..Default::default()
                },
            }))
        }
        None => base_source,
    };

    Ok(DeviceDescriptor {
        hostname: name,
        groups,
        model,
        connection,
        platform: opts.platform,
        image_source,
        enable_password: opts.enable_password.map(SecretString::from),
    })
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return PathBuf::from(path),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(path),
    }
}
