//! Locating, validating and staging firmware images.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, info, warn};
use secrecy::ExposeSecret;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;

use super::{ImageDelivery, ImageNaming, ImageReference, ImageSource};
use crate::error::{Error, FoundVersion, ImageError, Result};

/// Everything needed to resolve one image.
#[derive(Debug, Clone, Copy)]
pub struct ImageRequest<'a> {
    pub model: &'a str,
    pub platform: &'a str,
    pub version: &'a str,
    pub naming: &'a ImageNaming,
    pub delivery: ImageDelivery,
    pub source: &'a ImageSource,
}

/// Resolves image requests, sharing work between identical requests.
pub struct ImageResolver {
    client: reqwest::Client,
    inflight: Mutex<HashMap<String, Arc<OnceCell<ImageReference>>>>,
}

impl ImageResolver {
    /// Resolver with a default HTTP client.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ImageError::Download {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self::with_client(client))
    }

    /// Resolver using the given HTTP client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve an image.
    ///
    /// The filename comes from the source's pinned filename or the naming
    /// convention, and its embedded version must be exactly the requested
    /// string: `7.10` does not stand in for `7.10.0`, nor `7.10.2-rc1` for
    /// `7.10.2`.
    /// Push images are looked up in the local directory and downloaded
    /// there when missing; pull images only need to exist remotely.
    pub async fn resolve(&self, request: ImageRequest<'_>) -> Result<ImageReference> {
        let filename = self.filename(&request)?;
        let key = cache_key(&request, &filename);

        let cell = {
            let mut inflight = self
                .inflight
                .lock()
                .map_err(|_| Error::Internal("image resolver lock poisoned".into()))?;
            inflight.entry(key).or_default().clone()
        };

        let image = cell
            .get_or_try_init(|| async {
                match request.delivery {
                    ImageDelivery::Push => self.stage_local(&request, &filename).await,
                    ImageDelivery::Pull => self.check_remote(&request, &filename).await,
                }
            })
            .await?;

        Ok(image.clone())
    }

    /// Validate an image without staging it.
    ///
    /// Same checks as [`resolve`](Self::resolve), but nothing is written:
    /// a push image missing from the local directory is only checked for
    /// on its HTTP source. Results are not shared with `resolve`.
    pub async fn check(&self, request: ImageRequest<'_>) -> Result<ImageReference> {
        let filename = self.filename(&request)?;
        if request.delivery == ImageDelivery::Pull {
            return self.check_remote(&request, &filename).await;
        }

        let Some(directory) = request.source.directory.as_ref() else {
            return Err(ImageError::NotFound {
                filename,
                searched: format!("no image directory configured for model '{}'", request.model),
            }
            .into());
        };

        let path = directory.join(&filename);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!("Found image {}", path.display());
            return Ok(ImageReference::local(filename, request.version, path));
        }
        if request.source.remote_url(&filename).is_some_and(|u| is_http(&u)) {
            debug!("{} not staged yet, checking the remote source", filename);
            return self.check_remote(&request, &filename).await;
        }
        Err(ImageError::NotFound {
            filename,
            searched: directory.display().to_string(),
        }
        .into())
    }

    fn filename(&self, request: &ImageRequest<'_>) -> Result<String> {
        let Some(pinned) = request.source.filename.as_ref() else {
            return Ok(request.naming.filename(request.platform, request.version));
        };

        let found = request.naming.parse_version(pinned, request.platform);
        match found {
            Some(ref found) if found == request.version => Ok(pinned.clone()),
            _ => Err(ImageError::VersionMismatch {
                filename: pinned.clone(),
                expected: request.version.to_string(),
                found: FoundVersion(found),
            }
            .into()),
        }
    }

    async fn stage_local(&self, request: &ImageRequest<'_>, filename: &str) -> Result<ImageReference> {
        let Some(directory) = request.source.directory.as_ref() else {
            return Err(ImageError::NotFound {
                filename: filename.to_string(),
                searched: format!("no image directory configured for model '{}'", request.model),
            }
            .into());
        };

        let path = directory.join(filename);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!("Found image {}", path.display());
            return Ok(ImageReference::local(filename, request.version, path));
        }

        let Some(url) = request.source.remote_url(filename).filter(|u| is_http(u)) else {
            return Err(ImageError::NotFound {
                filename: filename.to_string(),
                searched: directory.display().to_string(),
            }
            .into());
        };

        info!("Downloading {} to {}", url, directory.display());
        tokio::fs::create_dir_all(directory)
            .await
            .map_err(|source| ImageError::Io {
                path: directory.clone(),
                source,
            })?;

        let partial = partial_path(&path);
        if let Err(e) = self.download(request.source, &url, &partial).await {
            if let Err(rm) = tokio::fs::remove_file(&partial).await {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove partial download {}: {}", partial.display(), rm);
                }
            }
            return Err(e);
        }

        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|source| ImageError::Io {
                path: path.clone(),
                source,
            })?;

        info!("Downloaded {}", path.display());
        Ok(ImageReference::local(filename, request.version, path))
    }

    async fn download(&self, source: &ImageSource, url: &str, partial: &Path) -> Result<()> {
        let response = self
            .authorized(self.client.get(url), source)
            .send()
            .await
            .map_err(|e| download_error(url, e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ImageError::NotFound {
                filename: url.rsplit('/').next().unwrap_or(url).to_string(),
                searched: url.to_string(),
            }
            .into());
        }
        let response = response
            .error_for_status()
            .map_err(|e| download_error(url, e))?;
        let expected = response.content_length();

        let io_error = |source| ImageError::Io {
            path: partial.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::create(partial).await.map_err(io_error)?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| download_error(url, e))?;
            file.write_all(&chunk).await.map_err(io_error)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_error)?;

        if let Some(expected) = expected {
            if written != expected {
                return Err(ImageError::Download {
                    url: url.to_string(),
                    message: format!("received {written} of {expected} bytes"),
                }
                .into());
            }
        }

        debug!("Wrote {} bytes to {}", written, partial.display());
        Ok(())
    }

    async fn check_remote(&self, request: &ImageRequest<'_>, filename: &str) -> Result<ImageReference> {
        let Some(url) = request.source.remote_url(filename) else {
            return Err(ImageError::NotFound {
                filename: filename.to_string(),
                searched: format!("no remote image source configured for model '{}'", request.model),
            }
            .into());
        };

        if is_http(&url) {
            let response = self
                .authorized(self.client.head(&url), request.source)
                .send()
                .await
                .map_err(|e| download_error(&url, e))?;
            if !response.status().is_success() {
                return Err(ImageError::NotFound {
                    filename: filename.to_string(),
                    searched: format!("{url} ({})", response.status()),
                }
                .into());
            }
        } else {
            debug!("Skipping existence check for non-HTTP source {}", url);
        }

        Ok(ImageReference::remote(filename, request.version, url).with_credentials(
            request.source.username.clone(),
            request.source.password.clone(),
        ))
    }

    fn authorized(&self, builder: reqwest::RequestBuilder, source: &ImageSource) -> reqwest::RequestBuilder {
        match &source.username {
            Some(user) => builder.basic_auth(
                user,
                source.password.as_ref().map(|p| p.expose_secret().to_string()),
            ),
            None => builder,
        }
    }
}

fn cache_key(request: &ImageRequest<'_>, filename: &str) -> String {
    match request.delivery {
        ImageDelivery::Push => match &request.source.directory {
            Some(dir) => dir.join(filename).display().to_string(),
            None => filename.to_string(),
        },
        ImageDelivery::Pull => request
            .source
            .remote_url(filename)
            .unwrap_or_else(|| filename.to_string()),
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn is_http(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn download_error(url: &str, err: reqwest::Error) -> Error {
    ImageError::Download {
        url: url.to_string(),
        message: err.to_string(),
    }
    .into()
}
