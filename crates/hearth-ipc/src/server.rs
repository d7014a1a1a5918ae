//! IPC server implementation

use hearth_api::{ClientInfo, ClientRole, ErrorCode, ErrorInfo, Event, Request, Response};
use hearth_util::ConnectionId;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{IpcError, IpcResult};

/// Message from a connection to the daemon
#[derive(Debug)]
pub enum ServerMessage {
    Request {
        connection_id: ConnectionId,
        request: Request,
    },
    ClientConnected {
        connection_id: ConnectionId,
        info: ClientInfo,
    },
    ClientDisconnected {
        connection_id: ConnectionId,
    },
}

pub struct IpcServer {
    socket_path: PathBuf,
    service_uids: Vec<u32>,
    listener: Option<UnixListener>,
    clients: Arc<RwLock<HashMap<ConnectionId, ClientHandle>>>,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    message_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>>,
}

struct ClientHandle {
    info: ClientInfo,
    response_tx: mpsc::UnboundedSender<String>,
    /// Handed to the broadcaster when the connection joins a family group
    event_tx: mpsc::UnboundedSender<Event>,
}

impl IpcServer {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            service_uids: Vec::new(),
            listener: None,
            clients: Arc::new(RwLock::new(HashMap::new())),
            message_tx,
            message_rx: Arc::new(Mutex::new(Some(message_rx))),
        }
    }

    /// Extra UIDs treated as trusted platform services
    pub fn with_service_uids(mut self, uids: impl IntoIterator<Item = u32>) -> Self {
        self.service_uids = uids.into_iter().collect();
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket, replacing a stale one
    pub async fn start(&mut self) -> IpcResult<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        // Owner and group only
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o660))?;

        info!(path = %self.socket_path.display(), "IPC server listening");

        self.listener = Some(listener);

        Ok(())
    }

    pub async fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.message_rx.lock().await.take()
    }

    /// Accept connections in a loop
    pub async fn run(&self) -> IpcResult<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or(IpcError::NotStarted)?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let connection_id = ConnectionId::new();
                    let uid = get_peer_uid(&stream);
                    let role = self.role_for(uid);

                    let mut info = ClientInfo::new(role);
                    info.connection_id = connection_id;
                    let info = match uid {
                        Some(u) => info.with_uid(u),
                        None => info,
                    };

                    info!(connection_id = %connection_id, uid = ?uid, role = ?role, "Client connected");

                    self.handle_client(stream, connection_id, info).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn role_for(&self, uid: Option<u32>) -> ClientRole {
        match uid {
            Some(0) => ClientRole::Service,
            Some(u) if u == nix::unistd::getuid().as_raw() => ClientRole::Service,
            Some(u) if self.service_uids.contains(&u) => ClientRole::Service,
            _ => ClientRole::Member,
        }
    }

    async fn handle_client(&self, stream: UnixStream, connection_id: ConnectionId, info: ClientInfo) {
        let (read_half, write_half) = stream.into_split();
        let (response_tx, mut response_rx) = mpsc::unbounded_channel::<String>();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
        let (closed_tx, mut closed_rx) = oneshot::channel::<()>();

        self.clients.write().await.insert(
            connection_id,
            ClientHandle {
                info: info.clone(),
                response_tx: response_tx.clone(),
                event_tx,
            },
        );

        let _ = self.message_tx.send(ServerMessage::ClientConnected {
            connection_id,
            info,
        });

        let message_tx = self.message_tx.clone();

        let reader_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();

            loop {
                match lines.next_line().await {
                    Ok(None) => {
                        debug!(connection_id = %connection_id, "Client disconnected (EOF)");
                        break;
                    }
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }

                        match serde_json::from_str::<Request>(line) {
                            Ok(request) => {
                                let _ = message_tx.send(ServerMessage::Request {
                                    connection_id,
                                    request,
                                });
                            }
                            Err(e) => {
                                warn!(connection_id = %connection_id, error = %e, "Invalid request");
                                let response = Response::error(
                                    0,
                                    ErrorInfo::new(ErrorCode::InvalidRequest, e.to_string()),
                                );
                                if let Ok(json) = serde_json::to_string(&response) {
                                    let _ = response_tx.send(json);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        debug!(connection_id = %connection_id, error = %e, "Read error");
                        break;
                    }
                }
            }
            let _ = closed_tx.send(());
        });

        let clients = self.clients.clone();
        let message_tx = self.message_tx.clone();

        tokio::spawn(async move {
            let mut writer = write_half;

            loop {
                let line = tokio::select! {
                    Some(response) = response_rx.recv() => response,
                    Some(event) = event_rx.recv() => match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(connection_id = %connection_id, error = %e, "Failed to encode event");
                            continue;
                        }
                    },
                    _ = &mut closed_rx => break,
                    else => break,
                };

                let mut msg = line;
                msg.push('\n');
                if let Err(e) = writer.write_all(msg.as_bytes()).await {
                    debug!(connection_id = %connection_id, error = %e, "Write error");
                    break;
                }
            }

            reader_handle.abort();
            clients.write().await.remove(&connection_id);
            let _ = message_tx.send(ServerMessage::ClientDisconnected { connection_id });
        });
    }

    /// Send a response to a specific connection
    pub async fn send_response(
        &self,
        connection_id: &ConnectionId,
        response: Response,
    ) -> IpcResult<()> {
        let json = serde_json::to_string(&response)?;

        let clients = self.clients.read().await;
        if let Some(handle) = clients.get(connection_id) {
            handle
                .response_tx
                .send(json)
                .map_err(|_| IpcError::ConnectionClosed)?;
        }

        Ok(())
    }

    /// Event sink for a connection, to be registered with a family group
    pub async fn event_sink(&self, connection_id: &ConnectionId) -> Option<mpsc::UnboundedSender<Event>> {
        let clients = self.clients.read().await;
        clients.get(connection_id).map(|h| h.event_tx.clone())
    }

    pub async fn get_client_info(&self, connection_id: &ConnectionId) -> Option<ClientInfo> {
        let clients = self.clients.read().await;
        clients.get(connection_id).map(|h| h.info.clone())
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Remove the socket file
    pub fn shutdown(&self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn get_peer_uid(stream: &UnixStream) -> Option<u32> {
    use std::os::unix::io::AsFd;

    let fd = stream.as_fd();

    match nix::sys::socket::getsockopt(&fd, nix::sys::socket::sockopt::PeerCredentials) {
        Ok(cred) => Some(cred.uid()),
        Err(_) => None,
    }
}
