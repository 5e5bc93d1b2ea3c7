//! Firmware image resolution.
//!
//! Drivers declare how their images are named ([`ImageNaming`]) and how
//! they reach the device ([`ImageDelivery`]); the inventory says where
//! images live ([`ImageSource`]). The [`ImageResolver`] turns the three
//! into an [`ImageReference`] before any device is contacted.

mod naming;
mod resolver;

pub use naming::{ImageNaming, STANDARD_TEMPLATE};
pub use resolver::{ImageRequest, ImageResolver};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::SecretString;

/// How an image gets onto the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageDelivery {
    /// The image is staged locally and uploaded over the session.
    Push,

    /// The device fetches the image itself from a remote URL.
    Pull,
}

/// Where images for a model are found.
#[derive(Debug, Clone, Default)]
pub struct ImageSource {
    /// Local image directory.
    pub directory: Option<PathBuf>,

    /// Remote base URL.
    pub url: Option<String>,

    /// Pinned filename used instead of the naming convention.
    pub filename: Option<String>,

    /// Credentials for the remote source.
    pub username: Option<String>,
    pub password: Option<Arc<SecretString>>,
}

impl ImageSource {
    /// Same source with a different local directory.
    pub fn with_directory(&self, directory: PathBuf) -> Self {
        Self {
            directory: Some(directory),
            ..self.clone()
        }
    }

    /// Remote URL of `filename` under this source.
    pub fn remote_url(&self, filename: &str) -> Option<String> {
        self.url
            .as_ref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), filename))
    }
}

/// A validated firmware image, ready to hand to a driver.
#[derive(Debug, Clone)]
pub struct ImageReference {
    filename: String,
    version: String,
    local_path: Option<PathBuf>,
    url: Option<String>,
    username: Option<String>,
    password: Option<Arc<SecretString>>,
}

impl ImageReference {
    /// Image staged in the local image directory.
    pub fn local(filename: impl Into<String>, version: impl Into<String>, path: PathBuf) -> Self {
        Self {
            filename: filename.into(),
            version: version.into(),
            local_path: Some(path),
            url: None,
            username: None,
            password: None,
        }
    }

    /// Image the device downloads from `url`.
    pub fn remote(filename: impl Into<String>, version: impl Into<String>, url: String) -> Self {
        Self {
            filename: filename.into(),
            version: version.into(),
            local_path: None,
            url: Some(url),
            username: None,
            password: None,
        }
    }

    /// Attach credentials for the remote URL.
    pub fn with_credentials(
        mut self,
        username: Option<String>,
        password: Option<Arc<SecretString>>,
    ) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&SecretString> {
        self.password.as_deref()
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.local_path, &self.url) {
            (Some(path), _) => write!(f, "{}", path.display()),
            (None, Some(url)) => f.write_str(url),
            (None, None) => f.write_str(&self.filename),
        }
    }
}
