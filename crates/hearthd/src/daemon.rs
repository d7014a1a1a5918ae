//! Main service loop

use anyhow::{Context, Result};
use hearth_api::{Command, ErrorCode, ErrorInfo, Response};
use hearth_config::OversightConfig;
use hearth_core::{Dispatcher, Lane, OversightService, RequestContext};
use hearth_ipc::{IpcServer, ServerMessage};
use hearth_store::{AuditEvent, AuditEventType, Store};
use hearth_util::{ConnectionId, HearthError, RateLimiter};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::PendingRequest;

/// Requests allowed per connection per second
pub const MAX_REQUESTS_PER_SECOND: u32 = 30;

const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const RATE_LIMIT_STALE_AFTER: Duration = Duration::from_secs(300);

pub struct Daemon {
    service: Arc<OversightService>,
    ipc: Arc<IpcServer>,
    dispatcher: Dispatcher,
    rate_limiter: RateLimiter<ConnectionId>,
    messages: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Daemon {
    /// Build the engine and bind the socket. Must run inside a tokio runtime.
    pub async fn start(
        config: &OversightConfig,
        store: Arc<dyn Store>,
        socket_path: &Path,
    ) -> Result<Self> {
        store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;

        let service = Arc::new(OversightService::new(config, store));

        let mut ipc = IpcServer::new(socket_path)
            .with_service_uids(config.service.service_uids.iter().copied());
        ipc.start()
            .await
            .with_context(|| format!("Failed to bind socket {:?}", socket_path))?;
        let messages = ipc
            .take_message_receiver()
            .await
            .context("IPC message receiver already taken")?;

        info!(socket_path = %socket_path.display(), "IPC server started");

        let dispatcher = Dispatcher::new(config.service.workers);

        Ok(Self {
            service,
            ipc: Arc::new(ipc),
            dispatcher,
            rate_limiter: RateLimiter::new(MAX_REQUESTS_PER_SECOND, Duration::from_secs(1)),
            messages,
        })
    }

    pub fn service(&self) -> &Arc<OversightService> {
        &self.service
    }

    /// Serve until `shutdown` resolves, then drain work and notify subscribers
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let accept = {
            let ipc = self.ipc.clone();
            tokio::spawn(async move {
                if let Err(e) = ipc.run().await {
                    error!(error = %e, "IPC server error");
                }
            })
        };

        let mut sweep = tokio::time::interval(self.service.service_config().expiry_sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cleanup = tokio::time::interval(RATE_LIMIT_CLEANUP_INTERVAL);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::pin!(shutdown);

        info!("Service running");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                _ = sweep.tick() => self.schedule_expiry_sweep(),

                _ = cleanup.tick() => self.rate_limiter.cleanup(RATE_LIMIT_STALE_AFTER),

                msg = self.messages.recv() => match msg {
                    Some(msg) => self.handle_ipc_message(msg).await,
                    None => {
                        warn!("IPC message channel closed");
                        break;
                    }
                },
            }
        }

        info!("Shutting down hearthd");

        accept.abort();
        let Daemon {
            service,
            ipc,
            dispatcher,
            ..
        } = self;
        dispatcher.shutdown().await;
        service.shutdown();
        ipc.shutdown();

        info!("Shutdown complete");
        Ok(())
    }

    /// Skipped when the normal lane is full; the next tick retries
    fn schedule_expiry_sweep(&self) {
        let service = self.service.clone();
        let ctx = RequestContext::system(service.service_config().request_timeout);
        let submitted = self
            .dispatcher
            .try_submit(Lane::Normal, async move {
                match service.expire_stale(&ctx).await {
                    Ok(expired) if !expired.is_empty() => {
                        info!(count = expired.len(), "Expired stale approvals");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Approval expiry sweep failed"),
                }
            });
        if let Err(e) = submitted {
            warn!(error = %e, "Failed to schedule expiry sweep");
        }
    }

    async fn handle_ipc_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::Request {
                connection_id,
                request,
            } => {
                if !self.rate_limiter.check(&connection_id) {
                    let response = Response::error(
                        request.request_id,
                        ErrorInfo::new(ErrorCode::RateLimited, "Too many requests"),
                    );
                    let _ = self.ipc.send_response(&connection_id, response).await;
                    return;
                }

                let Some(client) = self.ipc.get_client_info(&connection_id).await else {
                    debug!(connection_id = %connection_id, "Request from closed connection");
                    return;
                };
                let lane = if request.command.is_urgent() {
                    Lane::Priority
                } else {
                    Lane::Normal
                };
                let sink = match request.command {
                    Command::Subscribe { .. } => self.ipc.event_sink(&connection_id).await,
                    _ => None,
                };
                let request_id = request.request_id;
                let pending = match PendingRequest::admit(&self.service, request) {
                    Ok(pending) => pending,
                    Err(response) => {
                        let _ = self.ipc.send_response(&connection_id, response).await;
                        return;
                    }
                };

                let service = self.service.clone();
                let ipc = self.ipc.clone();
                let job = async move {
                    let response = pending.run(&service, &client, sink).await;
                    let _ = ipc.send_response(&connection_id, response).await;
                };
                // Only emergency stops may wait for room; the loop must keep
                // serving other connections while the normal lane is full
                let submitted = match lane {
                    Lane::Priority => self.dispatcher.submit(lane, job).await,
                    Lane::Normal => self.dispatcher.try_submit(lane, job),
                };
                match submitted {
                    Ok(()) => {}
                    Err(HearthError::RateLimited) => {
                        warn!(connection_id = %connection_id, request_id, "Request queue full");
                        let response = Response::error(
                            request_id,
                            ErrorInfo::new(ErrorCode::RateLimited, "Service busy, retry later"),
                        );
                        let _ = self.ipc.send_response(&connection_id, response).await;
                    }
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Failed to dispatch request");
                    }
                }
            }

            ServerMessage::ClientConnected {
                connection_id,
                info,
            } => {
                let _ = self.service.store().append_audit(AuditEvent::new(
                    AuditEventType::ClientConnected {
                        connection_id: connection_id.to_string(),
                        role: format!("{:?}", info.role),
                        uid: info.uid,
                    },
                ));
            }

            ServerMessage::ClientDisconnected { connection_id } => {
                debug!(connection_id = %connection_id, "Client disconnected");

                let left = self.service.unsubscribe(&connection_id);
                if left > 0 {
                    debug!(connection_id = %connection_id, groups = left, "Left family groups");
                }
                self.rate_limiter.remove(&connection_id);

                let _ = self.service.store().append_audit(AuditEvent::new(
                    AuditEventType::ClientDisconnected {
                        connection_id: connection_id.to_string(),
                    },
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_api::{Platform, ResponsePayload, ResponseResult};
    use hearth_config::parse_config;
    use hearth_ipc::IpcClient;
    use hearth_store::SqliteStore;
    use hearth_util::ChildId;
    use tempfile::TempDir;
    use tokio::sync::oneshot;

    const CONFIG: &str = r#"
        config_version = 1

        [service]
        workers = 1

        [[families]]
        id = "rivera"
        [[families.members]]
        id = "ana"
        role = "guardian"
        [[families.members]]
        id = "maya"
        role = "child"
    "#;

    async fn daemon(dir: &TempDir) -> Daemon {
        let config = parse_config(CONFIG).unwrap();
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
        let daemon = Daemon::start(&config, store, &dir.path().join("hearthd.sock"))
            .await
            .unwrap();
        let ipc = daemon.ipc.clone();
        tokio::spawn(async move {
            let _ = ipc.run().await;
        });
        daemon
    }

    async fn connect(dir: &TempDir, actor: &str) -> IpcClient {
        IpcClient::connect(dir.path().join("hearthd.sock"))
            .await
            .unwrap()
            .with_actor(actor)
    }

    /// Hold the only general worker until the returned sender fires
    async fn occupy_worker(daemon: &Daemon) -> oneshot::Sender<()> {
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        daemon
            .dispatcher
            .try_submit(Lane::Normal, async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
            })
            .unwrap();
        started_rx.await.unwrap();
        release_tx
    }

    /// Feed server messages through the loop until one request is handled
    async fn pump_request(daemon: &mut Daemon) {
        loop {
            let msg = daemon.messages.recv().await.unwrap();
            let is_request = matches!(msg, ServerMessage::Request { .. });
            tokio::time::timeout(Duration::from_secs(1), daemon.handle_ipc_message(msg))
                .await
                .expect("service loop stalled on a request");
            if is_request {
                break;
            }
        }
    }

    fn error_code(response: &Response) -> Option<ErrorCode> {
        match &response.result {
            ResponseResult::Err(e) => Some(e.code),
            ResponseResult::Ok(_) => None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn time_spent_queued_counts_against_the_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let mut daemon = daemon(&dir).await;
        let release = occupy_worker(&daemon).await;
        let mut adapter = connect(&dir, "steam-bridge")
            .await
            .with_timeout(Duration::from_millis(50));

        let (response, ()) = tokio::join!(
            adapter.send(Command::ReportSessionStarted {
                child_id: ChildId::new("maya"),
                platform: Platform::Steam,
                game_title: "Terraria".into(),
                at: None,
            }),
            async {
                pump_request(&mut daemon).await;
                tokio::time::sleep(Duration::from_millis(100)).await;
                let _ = release.send(());
            }
        );

        assert_eq!(
            error_code(&response.unwrap()),
            Some(ErrorCode::DeadlineExceeded)
        );
        assert!(daemon
            .service
            .sessions()
            .active_sessions(&ChildId::new("maya"))
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn full_queue_turns_requests_away_but_not_emergency_stops() {
        let dir = tempfile::tempdir().unwrap();
        let mut daemon = daemon(&dir).await;
        daemon.dispatcher = Dispatcher::with_capacity(1, 1);
        let release = occupy_worker(&daemon).await;
        daemon.dispatcher.try_submit(Lane::Normal, async {}).unwrap();

        let mut guardian = connect(&dir, "ana").await;

        let (response, ()) = tokio::join!(guardian.send(Command::Ping), pump_request(&mut daemon));
        assert_eq!(error_code(&response.unwrap()), Some(ErrorCode::RateLimited));

        let (response, ()) = tokio::join!(
            guardian.send(Command::EmergencyStop {
                child_id: ChildId::new("maya"),
                reason: "bedtime".into(),
            }),
            pump_request(&mut daemon)
        );
        match response.unwrap().result {
            ResponseResult::Ok(ResponsePayload::EmergencyStopped(report)) => {
                assert!(report.terminated.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }

        let _ = release.send(());
    }
}
