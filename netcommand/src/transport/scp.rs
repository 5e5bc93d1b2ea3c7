//! SCP upload over an exec channel.
//!
//! Implements the sink side handshake of `scp -t`: every protocol step is
//! acknowledged by the remote with a single zero byte, a `1` or `2` byte
//! followed by a message signals an error.

use std::path::Path;
use std::time::Duration;

use log::debug;
use russh::ChannelMsg;
use russh::client::{self, Handle, Msg};

use crate::error::{Result, TransportError};

/// Upload `local` to `remote` on the device.
pub(super) async fn upload<H: client::Handler>(
    handle: &Handle<H>,
    local: &Path,
    remote: &str,
    timeout: Duration,
) -> Result<()> {
    let file = tokio::fs::File::open(local)
        .await
        .map_err(TransportError::Io)?;
    let size = file.metadata().await.map_err(TransportError::Io)?.len();
    let name = remote.rsplit('/').next().unwrap_or(remote).to_string();

    debug!("scp {} ({} bytes) -> {}", local.display(), size, remote);

    let transfer = async {
        let mut channel = handle.channel_open_session().await?;
        channel.exec(true, format!("scp -t {remote}")).await?;
        expect_ack(&mut channel).await?;

        channel
            .data(format!("C0644 {size} {name}\n").as_bytes())
            .await?;
        expect_ack(&mut channel).await?;

        channel.data(file).await?;
        channel.data(&[0u8][..]).await?;
        expect_ack(&mut channel).await?;

        channel.eof().await?;
        Ok::<(), TransferFault>(())
    };

    match tokio::time::timeout(timeout, transfer).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(fault)) => Err(TransportError::TransferInterrupted {
            path: local.to_path_buf(),
            message: fault.0,
        }
        .into()),
        Err(_) => Err(TransportError::TransferInterrupted {
            path: local.to_path_buf(),
            message: format!("no completion within {timeout:?}"),
        }
        .into()),
    }
}

/// Reason a transfer stopped.
struct TransferFault(String);

impl From<russh::Error> for TransferFault {
    fn from(err: russh::Error) -> Self {
        Self(err.to_string())
    }
}

/// Wait for the remote acknowledgement byte.
async fn expect_ack(channel: &mut russh::Channel<Msg>) -> std::result::Result<(), TransferFault> {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { ref data }) => {
                return match data.first() {
                    Some(0) => Ok(()),
                    Some(_) => Err(TransferFault(
                        String::from_utf8_lossy(&data[1..]).trim().to_string(),
                    )),
                    None => continue,
                };
            }
            Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                return Err(TransferFault(
                    String::from_utf8_lossy(data).trim().to_string(),
                ));
            }
            Some(ChannelMsg::Eof | ChannelMsg::Close) | None => {
                return Err(TransferFault("channel closed by remote".to_string()));
            }
            Some(_) => {}
        }
    }
}
