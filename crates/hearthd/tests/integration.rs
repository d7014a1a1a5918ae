//! Integration tests for hearthd
//!
//! These run the daemon on a temporary socket and talk to it the way platform
//! adapters and family apps do.

use hearth_api::{
    ApprovalStatus, Command, Decision, ErrorCode, Event, EventPayload, InterceptOutcome, Platform,
    PurchaseAttempt, Response, ResponsePayload, ResponseResult, SessionEndReason,
};
use hearth_config::parse_config;
use hearth_core::OversightService;
use hearth_ipc::{EventStream, IpcClient};
use hearth_store::{AuditEventType, SqliteStore, Store};
use hearth_util::{Amount, ChildId, FamilyId};
use hearthd::Daemon;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const CONFIG: &str = r#"
    config_version = 1

    [service]
    workers = 2

    [[families]]
    id = "rivera"
    [[families.members]]
    id = "ana"
    role = "guardian"
    [[families.members]]
    id = "maya"
    display_name = "Maya"
    role = "child"
    [families.members.policy]
    daily_spending_limit = 20.00
    auto_approval_threshold = 5.00
    require_approval_for_purchases = true

    [[families]]
    id = "chen"
    [[families.members]]
    id = "wei"
    role = "guardian"
    [[families.members]]
    id = "lin"
    role = "child"
"#;

struct Harness {
    _dir: TempDir,
    socket: PathBuf,
    service: Arc<OversightService>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    async fn start(config: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("hearthd.sock");
        let config = parse_config(config).unwrap();
        let store: Arc<dyn Store> =
            Arc::new(SqliteStore::open(dir.path().join("hearthd.db")).unwrap());

        let daemon = Daemon::start(&config, store, &socket).await.unwrap();
        let service = daemon.service().clone();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(daemon.run(async move {
            let _ = rx.await;
        }));

        Self {
            _dir: dir,
            socket,
            service,
            shutdown: Some(tx),
            handle,
        }
    }

    async fn client(&self, actor: &str) -> IpcClient {
        IpcClient::connect(&self.socket)
            .await
            .unwrap()
            .with_actor(actor)
    }

    async fn subscriber(&self, actor: &str, family: &str) -> EventStream {
        self.client(actor)
            .await
            .subscribe(FamilyId::new(family))
            .await
            .unwrap()
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        (&mut self.handle).await.unwrap().unwrap();
    }
}

fn ok(response: Response) -> ResponsePayload {
    match response.result {
        ResponseResult::Ok(payload) => payload,
        ResponseResult::Err(e) => panic!("request failed: {:?} {}", e.code, e.message),
    }
}

fn err(response: Response) -> ErrorCode {
    match response.result {
        ResponseResult::Err(e) => e.code,
        ResponseResult::Ok(payload) => panic!("expected an error, got {:?}", payload),
    }
}

async fn next_event(events: &mut EventStream) -> Event {
    tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .expect("timed out waiting for event")
        .unwrap()
}

fn purchase(child: &str, cents: i64) -> Command {
    Command::InterceptPurchase {
        attempt: PurchaseAttempt {
            child_id: ChildId::new(child),
            platform: Platform::Steam,
            game_title: "Stardew Valley".into(),
            item_name: "Season pass".into(),
            amount: Amount::from_minor(cents),
            currency: "USD".into(),
            metadata: HashMap::new(),
        },
    }
}

#[tokio::test]
async fn test_purchase_approval_round_trip() {
    let harness = Harness::start(CONFIG).await;
    let mut events = harness.subscriber("ana", "rivera").await;
    let mut adapter = harness.client("steam-bridge").await;

    let small = ok(adapter.send(purchase("maya", 300)).await.unwrap());
    assert!(matches!(
        small,
        ResponsePayload::Purchase(InterceptOutcome::AutoApproved { .. })
    ));

    let approval_id = match ok(adapter.send(purchase("maya", 1200)).await.unwrap()) {
        ResponsePayload::Purchase(InterceptOutcome::PendingApproval { approval_id }) => approval_id,
        other => panic!("unexpected {:?}", other),
    };

    let event = next_event(&mut events).await;
    match event.payload {
        EventPayload::PurchasePending {
            approval_id: id,
            amount,
            ..
        } => {
            assert_eq!(id, approval_id);
            assert_eq!(amount, Amount::from_minor(1200));
        }
        other => panic!("unexpected {:?}", other),
    }

    let mut guardian = harness.client("ana").await;
    let resolved = ok(guardian
        .send(Command::ResolveApproval {
            approval_id,
            decision: Decision::Approve,
            reason: None,
        })
        .await
        .unwrap());
    match resolved {
        ResponsePayload::ApprovalResolved(approval) => {
            assert_eq!(approval.status, ApprovalStatus::Approved);
        }
        other => panic!("unexpected {:?}", other),
    }

    match next_event(&mut events).await.payload {
        EventPayload::ApprovalResolved { status, .. } => assert_eq!(status, ApprovalStatus::Approved),
        other => panic!("unexpected {:?}", other),
    }

    // Second decision loses
    let again = guardian
        .send(Command::ResolveApproval {
            approval_id,
            decision: Decision::Deny,
            reason: None,
        })
        .await
        .unwrap();
    assert_eq!(err(again), ErrorCode::Conflict);

    match ok(guardian
        .send(Command::GetSpendSummary {
            child_id: ChildId::new("maya"),
        })
        .await
        .unwrap())
    {
        ResponsePayload::SpendSummary(summary) => {
            assert_eq!(summary.today, Amount::from_minor(1500));
        }
        other => panic!("unexpected {:?}", other),
    }

    harness.stop().await;
}

#[tokio::test]
async fn test_other_family_guardian_is_refused() {
    let harness = Harness::start(CONFIG).await;
    let mut wei = harness.client("wei").await;

    let code = err(wei
        .send(Command::GetLiveStatus {
            family_id: FamilyId::new("rivera"),
        })
        .await
        .unwrap());
    assert_eq!(code, ErrorCode::Unauthorized);

    let code = err(wei
        .send(Command::Subscribe {
            family_id: FamilyId::new("nobody"),
        })
        .await
        .unwrap());
    assert_eq!(code, ErrorCode::Unauthorized);

    harness.stop().await;
}

#[tokio::test]
async fn test_emergency_stop_reaches_guardians() {
    let harness = Harness::start(CONFIG).await;
    let mut adapter = harness.client("console-bridge").await;
    for platform in [Platform::Steam, Platform::Xbox] {
        ok(adapter
            .send(Command::ReportSessionStarted {
                child_id: ChildId::new("maya"),
                platform,
                game_title: "Fortnite".into(),
                at: None,
            })
            .await
            .unwrap());
    }

    let mut events = harness.subscriber("ana", "rivera").await;
    let mut guardian = harness.client("ana").await;
    let report = match ok(guardian
        .send(Command::EmergencyStop {
            child_id: ChildId::new("maya"),
            reason: "dinner".into(),
        })
        .await
        .unwrap())
    {
        ResponsePayload::EmergencyStopped(report) => report,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(report.terminated.len(), 2);

    let mut ended = 0;
    loop {
        match next_event(&mut events).await.payload {
            EventPayload::SessionEnded { reason, .. } => {
                assert_eq!(reason, SessionEndReason::EmergencyStop);
                ended += 1;
            }
            EventPayload::EmergencyStopExecuted { reason, .. } => {
                assert_eq!(reason, "dinner");
                break;
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(ended, 2);

    match ok(guardian
        .send(Command::GetLiveStatus {
            family_id: FamilyId::new("rivera"),
        })
        .await
        .unwrap())
    {
        ResponsePayload::LiveStatus { children } => {
            assert_eq!(children.len(), 1);
            assert!(!children[0].is_gaming);
        }
        other => panic!("unexpected {:?}", other),
    }

    harness.stop().await;
}

#[tokio::test]
async fn test_requests_are_rate_limited() {
    let harness = Harness::start(CONFIG).await;
    let mut client = harness.client("ana").await;

    let mut limited = 0;
    for _ in 0..40 {
        let response = client.send(Command::Ping).await.unwrap();
        if let ResponseResult::Err(e) = response.result {
            assert_eq!(e.code, ErrorCode::RateLimited);
            limited += 1;
        }
    }
    assert!(limited > 0);

    harness.stop().await;
}

#[tokio::test]
async fn test_shutdown_notifies_subscribers() {
    let harness = Harness::start(CONFIG).await;
    let mut events = harness.subscriber("ana", "rivera").await;
    let socket = harness.socket.clone();
    let service = harness.service.clone();

    harness.stop().await;

    let event = next_event(&mut events).await;
    assert!(matches!(event.payload, EventPayload::Shutdown));
    assert!(!socket.exists());

    let audits = service.store().get_recent_audits(50).unwrap();
    assert!(audits
        .iter()
        .any(|a| matches!(a.event, AuditEventType::ServiceStarted)));
    assert!(audits
        .iter()
        .any(|a| matches!(a.event, AuditEventType::ServiceStopped)));
    assert!(audits
        .iter()
        .any(|a| matches!(a.event, AuditEventType::SubscriberJoined { .. })));
}

#[tokio::test]
async fn test_stale_approvals_expire_in_background() {
    let config = CONFIG.replace(
        "[service]\n    workers = 2",
        "[service]\n    workers = 2\n    approval_ttl_seconds = 1\n    expiry_sweep_interval_seconds = 1",
    );
    let harness = Harness::start(&config).await;
    let mut events = harness.subscriber("ana", "rivera").await;
    let mut adapter = harness.client("steam-bridge").await;

    let approval_id = match ok(adapter.send(purchase("maya", 900)).await.unwrap()) {
        ResponsePayload::Purchase(InterceptOutcome::PendingApproval { approval_id }) => approval_id,
        other => panic!("unexpected {:?}", other),
    };
    assert!(matches!(
        next_event(&mut events).await.payload,
        EventPayload::PurchasePending { .. }
    ));

    match next_event(&mut events).await.payload {
        EventPayload::ApprovalExpired { approval_id: id, .. } => assert_eq!(id, approval_id),
        other => panic!("unexpected {:?}", other),
    }

    harness.stop().await;
}
