//! Unix domain socket server for the settings editor
//!
//! Each request is answered with exactly one response. Binding edits run on
//! the blocking pool because they commit to disk before replying.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::bindings::{BindingCache, BindingTable};
use crate::events::ChangeBus;
use crate::hotkey::TapStatus;

use super::protocol::{DaemonStatus, Request, Response};

const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// State shared by every client connection
#[derive(Clone)]
pub struct ServerContext {
    table: Arc<Mutex<BindingTable>>,
    cache: BindingCache,
    bus: ChangeBus,
    tap: Arc<TapStatus>,
    start_time: Instant,
}

impl ServerContext {
    pub fn new(table: BindingTable, cache: BindingCache, bus: ChangeBus, tap: Arc<TapStatus>) -> Self {
        Self {
            table: Arc::new(Mutex::new(table)),
            cache,
            bus,
            tap,
            start_time: Instant::now(),
        }
    }
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    context: ServerContext,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind the control socket
    pub fn new(socket_path: &Path, context: ServerContext) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path)
            .context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            context,
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let context = self.context.clone();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, context) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(mut stream: UnixStream, context: ServerContext) -> Result<()> {
        let mut len_buf = [0u8; 4];

        loop {
            // Read message length (4-byte little-endian)
            match stream.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_MESSAGE_LEN {
                warn!(len, "message too large, disconnecting");
                return Ok(());
            }

            // Read message body
            let mut msg_buf = vec![0u8; len];
            stream.read_exact(&mut msg_buf).await?;

            let response = match serde_json::from_slice::<Request>(&msg_buf) {
                Ok(request) => {
                    debug!(?request, "received request");
                    Self::process_request(request, &context).await
                }
                Err(e) => {
                    warn!(error = %e, "malformed request");
                    Response::error("bad_request", e.to_string())
                }
            };

            Self::send_message(&mut stream, &response).await?;
        }
    }

    /// Send a length-prefixed JSON message
    async fn send_message<T: serde::Serialize>(stream: &mut UnixStream, msg: &T) -> Result<()> {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        stream.write_all(&msg_len).await?;
        stream.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Process a request and return a response
    async fn process_request(request: Request, context: &ServerContext) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                // An edit can hold the table across an fsync
                let table = Arc::clone(&context.table);
                let binding_count = tokio::task::spawn_blocking(move || binding_count(&table))
                    .await
                    .unwrap_or_default();

                Response::Status(DaemonStatus {
                    tap_active: context.tap.is_active(),
                    tap_reenables: context.tap.reenables(),
                    binding_count,
                    edit_revision: context.bus.last_revision(),
                    snapshot_revision: context.cache.revision(),
                    refresh_in_progress: context.cache.is_refreshing(),
                    uptime_secs: context.start_time.elapsed().as_secs(),
                    ..DaemonStatus::default()
                })
            }

            edit => {
                let table = Arc::clone(&context.table);
                tokio::task::spawn_blocking(move || match table.lock() {
                    Ok(mut table) => apply_edit(&mut table, edit),
                    Err(_) => Response::error("internal", "binding table lock poisoned"),
                })
                .await
                .unwrap_or_else(|e| Response::error("internal", e.to_string()))
            }
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

fn binding_count(table: &Mutex<BindingTable>) -> usize {
    table.lock().map(|t| t.len()).unwrap_or(0)
}

/// Apply a table request; status-only requests never reach here
fn apply_edit(table: &mut BindingTable, request: Request) -> Response {
    let result = match request {
        Request::ListBindings => Ok(Response::Bindings {
            bindings: table.list().to_vec(),
        }),
        Request::GetBinding { id } => table
            .get(id)
            .map(|binding| Response::Binding { binding: binding.clone() }),
        Request::AddBinding { binding } => table
            .insert(binding)
            .map(|binding| Response::Binding { binding }),
        Request::AddTemplate => table
            .insert_template()
            .map(|binding| Response::Binding { binding }),
        Request::RemoveBinding { id } => table.remove(id).map(|_| Response::Removed { id }),
        Request::MoveBindings { start, end, to } => table
            .reorder(start..end, to)
            .map(|()| Response::Bindings {
                bindings: table.list().to_vec(),
            }),
        Request::ToggleBinding { id } => table
            .toggle(id)
            .map(|enabled| Response::Toggled { id, enabled }),
        Request::UpdateBinding { id, update } => table
            .update(id, update)
            .map(|binding| Response::Binding { binding }),
        Request::Ping | Request::GetStatus => Ok(Response::error("internal", "not an edit")),
    };

    result.unwrap_or_else(Response::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::bindings::{BindingDraft, BindingId, MemoryStore};
    use crate::hotkey::{Modifier, ModifierSet};

    fn context() -> ServerContext {
        let store = Arc::new(MemoryStore::default());
        let bus = ChangeBus::new(8);
        let table = BindingTable::open(store.clone(), bus.clone()).unwrap();
        ServerContext::new(table, BindingCache::new(store), bus, Arc::new(TapStatus::default()))
    }

    async fn request(stream: &mut UnixStream, request: &Request) -> Response {
        Server::send_message(stream, request).await.unwrap();
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        stream.read_exact(&mut body).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn kitty() -> BindingDraft {
        BindingDraft {
            target: "/Applications/kitty.app".to_string(),
            modifiers: ModifierSet::of(&[Modifier::Option, Modifier::Command]),
            key: "t".to_string(),
            enabled: true,
        }
    }

    #[test]
    fn test_apply_edits() {
        let ctx = context();
        let mut table = ctx.table.lock().unwrap();

        let added = apply_edit(&mut table, Request::AddBinding { binding: kitty() });
        let id = match added {
            Response::Binding { binding } => binding.id,
            other => panic!("unexpected response: {:?}", other),
        };
        assert!(matches!(
            apply_edit(&mut table, Request::GetBinding { id }),
            Response::Binding { ref binding } if binding.key == "t"
        ));

        assert_eq!(
            apply_edit(&mut table, Request::ToggleBinding { id }),
            Response::Toggled { id, enabled: false }
        );
        assert!(matches!(
            apply_edit(&mut table, Request::AddTemplate),
            Response::Binding { .. }
        ));
        assert!(matches!(
            apply_edit(&mut table, Request::MoveBindings { start: 1, end: 2, to: 0 }),
            Response::Bindings { ref bindings } if bindings[0].target == "New Application"
        ));
        assert_eq!(
            apply_edit(&mut table, Request::RemoveBinding { id }),
            Response::Removed { id }
        );
        assert!(matches!(
            apply_edit(&mut table, Request::RemoveBinding { id: BindingId(99) }),
            Response::Error { ref code, .. } if code == "not_found"
        ));
    }

    #[tokio::test]
    async fn test_status_does_not_block_runtime_on_table_lock() {
        let ctx = context();
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = {
            let table = Arc::clone(&ctx.table);
            std::thread::spawn(move || {
                let _guard = table.lock().unwrap();
                locked_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(500));
            })
        };
        locked_rx.recv().unwrap();

        let status = tokio::spawn({
            let ctx = ctx.clone();
            async move { Server::process_request(Request::GetStatus, &ctx).await }
        });

        // The status task runs first and must yield back while it waits
        let started = Instant::now();
        tokio::task::yield_now().await;
        assert!(started.elapsed() < Duration::from_millis(250));

        assert!(matches!(status.await.unwrap(), Response::Status(_)));
        holder.join().unwrap();
    }

    #[tokio::test]
    async fn test_socket_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("daemon.sock");
        let server = Arc::new(Server::new(&socket, context()).unwrap());
        let running = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.run().await }
        });

        let mut stream = UnixStream::connect(&socket).await.unwrap();
        assert_eq!(request(&mut stream, &Request::Ping).await, Response::Pong);

        let added = request(&mut stream, &Request::AddBinding { binding: kitty() }).await;
        assert!(matches!(added, Response::Binding { .. }));

        match request(&mut stream, &Request::GetStatus).await {
            Response::Status(status) => {
                assert!(!status.tap_active);
                assert_eq!(status.binding_count, 1);
                assert_eq!(status.edit_revision, 1);
                assert!(!status.refresh_in_progress);
            }
            other => panic!("unexpected response: {:?}", other),
        }

        match request(&mut stream, &Request::ListBindings).await {
            Response::Bindings { bindings } => assert_eq!(bindings.len(), 1),
            other => panic!("unexpected response: {:?}", other),
        }

        server.shutdown().await;
        assert!(!socket.exists());
        running.abort();
    }
}
