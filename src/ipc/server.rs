//! Local IPC endpoint: a Unix domain socket, or a named pipe on Windows.
//!
//! Each connection gets its own task and may send any number of requests,
//! one JSON object per line; every request gets exactly one response line.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::protocol::{DaemonRequest, DaemonResponse, MAX_LINE_BYTES, encode_line};
use crate::credentials::Caller;
use crate::error::{GuardError, GuardResult};

/// A connection with no request for this long is closed
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Serves one decoded request from `caller`
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(
        &self,
        caller: Caller,
        request: DaemonRequest,
    ) -> impl Future<Output = DaemonResponse> + Send;
}

pub struct IpcServer {
    #[cfg(unix)]
    listener: tokio::net::UnixListener,
    endpoint: PathBuf,
    request_timeout: Duration,
}

impl IpcServer {
    /// Bind the socket, replacing a stale one, and open it to every local user
    #[cfg(unix)]
    pub fn bind(path: &Path, request_timeout: Duration) -> GuardResult<Self> {
        use std::os::unix::fs::PermissionsExt;

        if let Some(parent) = path.parent() {
            crate::platform::common::ensure_directory_exists(parent)
                .map_err(|e| GuardError::from_write_failure("create socket directory", e))?;
        }
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Removed stale socket {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(GuardError::from_io("remove stale socket", e)),
        }

        let listener = tokio::net::UnixListener::bind(path)
            .map_err(|e| GuardError::from_io("bind IPC socket", e))?;
        // Unprivileged clients (the parent's UI and CLI) must be able to connect
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))
            .map_err(|e| GuardError::from_io("set socket permissions", e))?;

        info!("Listening on {}", path.display());
        Ok(Self {
            listener,
            endpoint: path.to_path_buf(),
            request_timeout,
        })
    }

    /// Named pipe instances are created per connection in [`IpcServer::serve`]
    #[cfg(windows)]
    pub fn bind(pipe_name: &Path, request_timeout: Duration) -> GuardResult<Self> {
        info!("Listening on {}", pipe_name.display());
        Ok(Self {
            endpoint: pipe_name.to_path_buf(),
            request_timeout,
        })
    }

    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Accept connections until `shutdown` flips to true
    #[cfg(unix)]
    pub async fn serve<H: RequestHandler>(
        self,
        handler: Arc<H>,
        mut shutdown: watch::Receiver<bool>,
    ) -> GuardResult<()> {
        let mut connections: u64 = 0;
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        connections += 1;
                        let caller = match stream.peer_cred() {
                            Ok(cred) => Caller::User(cred.uid()),
                            Err(e) => {
                                debug!("No peer credentials for IPC connection: {}", e);
                                Caller::Connection(connections)
                            }
                        };
                        let handler = handler.clone();
                        let timeout = self.request_timeout;
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, caller, handler, timeout).await {
                                debug!("IPC connection closed: {}", e);
                            }
                        });
                    }
                    Err(e) => warn!("Failed to accept IPC connection: {}", e),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let _ = std::fs::remove_file(&self.endpoint);
        info!("IPC server stopped");
        Ok(())
    }

    #[cfg(windows)]
    pub async fn serve<H: RequestHandler>(
        self,
        handler: Arc<H>,
        mut shutdown: watch::Receiver<bool>,
    ) -> GuardResult<()> {
        use tokio::net::windows::named_pipe::ServerOptions;

        let name = self.endpoint.as_os_str().to_os_string();
        let mut connections: u64 = 0;
        let mut server = ServerOptions::new()
            .first_pipe_instance(true)
            .create(&name)
            .map_err(|e| GuardError::from_io("create named pipe", e))?;

        loop {
            tokio::select! {
                connected = server.connect() => {
                    if let Err(e) = connected {
                        warn!("Failed to accept IPC connection: {}", e);
                        continue;
                    }
                    // The next instance must exist before this one is handed off
                    let next = ServerOptions::new()
                        .create(&name)
                        .map_err(|e| GuardError::from_io("create named pipe", e))?;
                    let stream = std::mem::replace(&mut server, next);
                    connections += 1;
                    let caller = Caller::Connection(connections);

                    let handler = handler.clone();
                    let timeout = self.request_timeout;
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, caller, handler, timeout).await {
                            debug!("IPC connection closed: {}", e);
                        }
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("IPC server stopped");
        Ok(())
    }
}

/// Serve requests on one connection until the peer hangs up or goes idle
pub async fn handle_connection<S, H>(
    stream: S,
    caller: Caller,
    handler: Arc<H>,
    request_timeout: Duration,
) -> GuardResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: RequestHandler,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::time::timeout(
            IDLE_TIMEOUT,
            (&mut reader).take(MAX_LINE_BYTES as u64 + 1).read_line(&mut line),
        )
        .await
        .map_err(|_| GuardError::Timeout("idle IPC connection".to_string()))??;

        if read == 0 {
            return Ok(());
        }

        if read > MAX_LINE_BYTES && !line.ends_with('\n') {
            let response = DaemonResponse::from_result::<()>(Err(GuardError::Validation(format!(
                "request longer than {MAX_LINE_BYTES} bytes"
            ))));
            writer.write_all(encode_line(&response)?.as_bytes()).await?;
            return Ok(());
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<DaemonRequest>(trimmed) {
            Ok(request) => {
                let name = request.name();
                debug!("IPC request: {}", name);
                match tokio::time::timeout(request_timeout, handler.handle(caller, request)).await {
                    Ok(response) => response,
                    Err(_) => {
                        warn!("IPC request {} timed out", name);
                        DaemonResponse::from_result::<()>(Err(GuardError::Timeout(format!(
                            "request {name}"
                        ))))
                    }
                }
            }
            Err(e) => DaemonResponse::from_result::<()>(Err(GuardError::Validation(format!(
                "malformed request: {e}"
            )))),
        };

        writer.write_all(encode_line(&response)?.as_bytes()).await?;
        writer.flush().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl RequestHandler for Echo {
        async fn handle(&self, caller: Caller, request: DaemonRequest) -> DaemonResponse {
            match request {
                DaemonRequest::Ping => DaemonResponse::from_result(Ok("pong")),
                DaemonRequest::GetAuthStatus => DaemonResponse::from_result(Ok(format!("{caller:?}"))),
                DaemonRequest::ShouldBlockNow => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    DaemonResponse::from_result(Ok(true))
                }
                other => DaemonResponse::from_result::<()>(Err(GuardError::NotFound(
                    other.name().to_string(),
                ))),
            }
        }
    }

    async fn exchange(input: &str, timeout: Duration) -> Vec<DaemonResponse> {
        let (client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(handle_connection(
            server,
            Caller::Connection(7),
            Arc::new(Echo),
            timeout,
        ));

        let (read_half, mut write_half) = tokio::io::split(client);
        write_half.write_all(input.as_bytes()).await.unwrap();
        write_half.shutdown().await.unwrap();

        let mut lines = BufReader::new(read_half).lines();
        let mut responses = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            responses.push(serde_json::from_str(&line).unwrap());
        }
        task.await.unwrap().unwrap();
        responses
    }

    #[tokio::test]
    async fn test_one_response_per_line() {
        let responses = exchange(
            "{\"command\":\"ping\"}\n\n{\"command\":\"get_status\"}\n",
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].clone().into_result::<String>().unwrap(), "pong");
        assert_eq!(responses[1].clone().into_result::<()>().unwrap_err().kind(), "NotFound");
    }

    #[tokio::test]
    async fn test_malformed_request_is_validation_error() {
        let responses = exchange("not json\n", Duration::from_secs(1)).await;
        assert_eq!(
            responses[0].clone().into_result::<()>().unwrap_err().kind(),
            "ValidationError"
        );
    }

    #[tokio::test]
    async fn test_slow_request_times_out() {
        let responses = exchange("{\"command\":\"should_block_now\"}\n", Duration::from_millis(50)).await;
        assert_eq!(responses[0].clone().into_result::<bool>().unwrap_err().kind(), "Timeout");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_socket_round_trip() {
        use crate::ipc::client::DaemonClient;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("guard.sock");
        let server = IpcServer::bind(&path, Duration::from_secs(1)).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o666);

        let (stop, stopped) = watch::channel(false);
        let serving = tokio::spawn(server.serve(Arc::new(Echo), stopped));

        let client = DaemonClient::new(&path, Duration::from_secs(1));
        let pong: String = client.request(&DaemonRequest::Ping).await.unwrap();
        assert_eq!(pong, "pong");

        // Socket peers are identified by uid
        let caller: String = client.request(&DaemonRequest::GetAuthStatus).await.unwrap();
        // SAFETY: geteuid has no preconditions and cannot fail
        let uid = unsafe { libc::geteuid() };
        assert_eq!(caller, format!("{:?}", Caller::User(uid)));

        stop.send(true).unwrap();
        serving.await.unwrap().unwrap();
        assert!(!path.exists());
    }
}
