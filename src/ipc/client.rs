use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

use super::protocol::{DaemonRequest, DaemonResponse, encode_line};
use crate::config::DaemonConfig;
use crate::error::{GuardError, GuardResult};

/// One-request-per-call client for the daemon's IPC endpoint
#[derive(Debug, Clone)]
pub struct DaemonClient {
    endpoint: PathBuf,
    timeout: Duration,
}

impl DaemonClient {
    pub fn new(endpoint: &Path, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_path_buf(),
            timeout,
        }
    }

    pub fn from_config(config: &DaemonConfig) -> Self {
        Self::new(
            &config.ipc.socket_path,
            Duration::from_secs(config.ipc.request_timeout_secs),
        )
    }

    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Send `request` and decode the response payload as `T`
    pub async fn request<T: DeserializeOwned>(&self, request: &DaemonRequest) -> GuardResult<T> {
        self.send(request).await?.into_result()
    }

    pub async fn send(&self, request: &DaemonRequest) -> GuardResult<DaemonResponse> {
        debug!("Sending {} to {}", request.name(), self.endpoint.display());

        tokio::time::timeout(self.timeout, async {
            #[cfg(unix)]
            let stream = tokio::net::UnixStream::connect(&self.endpoint)
                .await
                .map_err(|e| self.unreachable(e))?;

            #[cfg(windows)]
            let stream = tokio::net::windows::named_pipe::ClientOptions::new()
                .open(&self.endpoint)
                .map_err(|e| self.unreachable(e))?;

            exchange(stream, request).await
        })
        .await
        .map_err(|_| GuardError::Timeout(format!("daemon request {}", request.name())))?
    }

    /// Whether a daemon answers on the endpoint
    pub async fn is_running(&self) -> bool {
        self.request::<String>(&DaemonRequest::Ping).await.is_ok()
    }

    fn unreachable(&self, err: std::io::Error) -> GuardError {
        GuardError::DaemonUnreachable(format!("{}: {}", self.endpoint.display(), err))
    }
}

async fn exchange<S>(stream: S, request: &DaemonRequest) -> GuardResult<DaemonResponse>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    writer.write_all(encode_line(request)?.as_bytes()).await?;
    writer.flush().await?;

    let mut line = String::new();
    let read = BufReader::new(reader).read_line(&mut line).await?;
    if read == 0 {
        return Err(GuardError::DaemonUnreachable(
            "daemon closed the connection without answering".to_string(),
        ));
    }
    Ok(serde_json::from_str(line.trim_end())?)
}
