//! Command-side tests: outbound connections driven over the event bus,
//! automatic restart and rebind, and the operator queries. Two server
//! instances talk to each other over loopback where a real peer is needed.
//!
//! Run with: cargo test --test commands

use std::future::Future;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};

use futures::{SinkExt, StreamExt};
use tokio_util::codec::Framed;

use smpplink::bootstrap::{Server, SharedServerState};
use smpplink::bus::{Event, EventHandler};
use smpplink::config::{Config, ConnectionConfig, ListenerConfig};
use smpplink::connector;
use smpplink::proto::{Command, Pdu, SmppCodec};

/// Port allocator for tests
static PORT: AtomicU16 = AtomicU16::new(29400);

fn next_port() -> u16 {
    PORT.fetch_add(1, Ordering::SeqCst)
}

struct Decide(Value);

#[async_trait]
impl EventHandler for Decide {
    async fn handle(&self, event: Event) -> Option<Event> {
        if event.handled {
            return None;
        }
        Some(event.resolve(self.0.clone()))
    }
}

fn decide(result: impl Into<Value>) -> Arc<Decide> {
    Arc::new(Decide(result.into()))
}

/// Bus handler that accepts and attaches a message id as an event field.
struct Issue(&'static str);

#[async_trait]
impl EventHandler for Issue {
    async fn handle(&self, event: Event) -> Option<Event> {
        if event.handled {
            return None;
        }
        Some(event.with("message_id", self.0).resolve(true))
    }
}

fn state_with(config: Config) -> SharedServerState {
    Server::new(config).state()
}

/// An SMSC-side instance that admits everyone and accepts every bind.
async fn smsc(port: u16) -> SharedServerState {
    let mut config = Config::default();
    config.listener.insert(
        "main".to_string(),
        ListenerConfig {
            port,
            ..Default::default()
        },
    );
    let state = state_with(config);
    state.bus.install("smpp.connect", decide(true));
    state.bus.install("smpp.bind_transmitter", decide(true));
    state.bus.install("smpp.bind_receiver", decide(true));
    state.bus.install("smpp.bind_transceiver", decide(true));
    let answer = state
        .bus
        .dispatch(Event::request("smpp.listen").with("listener_id", "main"))
        .await
        .unwrap();
    assert!(answer.error.is_none(), "listen failed: {:?}", answer.error);
    state
}

/// ESME-side instance configured to dial the given port as "up".
fn esme(port: u16, restart: Option<Duration>) -> SharedServerState {
    let mut config = Config::default();
    config.connection.insert(
        "up".to_string(),
        ConnectionConfig {
            enabled: true,
            port,
            system_id: "esme1".to_string(),
            password: "secret".to_string(),
            restart,
            bind_delay: Duration::from_millis(50),
            ..Default::default()
        },
    );
    state_with(config)
}

/// Plain TCP peer that accepts and parks sockets, for tests that never
/// speak the protocol.
async fn silent_peer() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut parked = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            parked.push(stream);
        }
    });
    port
}

async fn wait_until<F, Fut>(what: &str, mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = timeout(Duration::from_secs(3), async {
        loop {
            if cond().await {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    });
    deadline.await.unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

async fn is_bound(state: &SharedServerState, id: &str) -> bool {
    match state.connections.get(id).await {
        Some(conn) => conn.is_bound().await,
        None => false,
    }
}

#[tokio::test]
async fn connect_command_is_idempotent() {
    let port = silent_peer().await;
    let state = state_with(Config::default());

    let connect = || {
        Event::request("smpp.connect")
            .with("connection_id", "peer")
            .with("host", "127.0.0.1")
            .with("port", port as u32)
    };

    let first = state.bus.dispatch(connect()).await.unwrap();
    assert!(first.error.is_none());
    let snapshot = first.result.clone().unwrap();
    assert_eq!(snapshot["connection_id"], json!("peer"));
    assert_eq!(snapshot["bound"], json!(null));

    // a second connect for a live id describes it, no new socket
    let second = state.bus.dispatch(connect()).await.unwrap();
    assert!(second.error.is_none());
    assert_eq!(second.result.unwrap()["connection_id"], json!("peer"));
    assert_eq!(state.connections.len().await, 1);
}

#[tokio::test]
async fn outgoing_bind_and_submit_round_trip() {
    let port = next_port();
    let upstream = smsc(port).await;
    upstream.bus.install("smpp.submit_sm", Arc::new(Issue("m-42")));

    let state = esme(port, None);
    let answer = state
        .bus
        .dispatch(Event::request("smpp.connect").with("connection_id", "up"))
        .await
        .unwrap();
    assert!(answer.error.is_none(), "connect failed: {:?}", answer.error);

    let answer = state
        .bus
        .dispatch(
            Event::request("smpp.bind_transceiver")
                .with("connection_id", "up")
                .with("system_id", "esme1")
                .with("password", "secret"),
        )
        .await
        .unwrap();
    assert!(answer.error.is_none(), "bind failed: {:?}", answer.error);
    let result = answer.result.unwrap();
    assert_eq!(result["command_status"], json!(0));

    // the accepted response flips our side to bound as well
    assert!(is_bound(&state, "up").await);
    wait_until("upstream side bound", || is_bound(&upstream, "main.1")).await;

    // a repeat connect describes the live connection with its role
    let answer = state
        .bus
        .dispatch(Event::request("smpp.connect").with("connection_id", "up"))
        .await
        .unwrap();
    assert_eq!(answer.result.unwrap()["bound"], json!("transceiver"));

    let answer = state
        .bus
        .dispatch(
            Event::request("smpp.submit_sm")
                .with("connection_id", "up")
                .with("source_addr", "1000")
                .with("destination_addr", "2000")
                .with("short_message", "6869"),
        )
        .await
        .unwrap();
    assert!(answer.error.is_none(), "submit failed: {:?}", answer.error);
    let result = answer.result.unwrap();
    assert_eq!(result["command_status"], json!(0));
    assert_eq!(result["message_id"], json!("m-42"));
}

#[tokio::test]
async fn command_error_kinds() {
    let state = state_with(Config::default());

    let answer = state
        .bus
        .dispatch(Event::request("smpp.submit_sm").with("connection_id", "ghost"))
        .await
        .unwrap();
    assert_eq!(answer.error.as_deref(), Some("NoConnection"));

    let answer = state
        .bus
        .dispatch(Event::request("smpp.listen"))
        .await
        .unwrap();
    assert_eq!(answer.error.as_deref(), Some("InvalidId"));

    let answer = state
        .bus
        .dispatch(Event::request("smpp.unlisten").with("listener_id", "ghost"))
        .await
        .unwrap();
    assert_eq!(answer.error.as_deref(), Some("NotFound"));

    let port = next_port() as u32;
    let listen = || {
        Event::request("smpp.listen")
            .with("listener_id", "dup")
            .with("port", port)
    };
    let answer = state.bus.dispatch(listen()).await.unwrap();
    assert!(answer.error.is_none());
    let answer = state.bus.dispatch(listen()).await.unwrap();
    assert_eq!(answer.error.as_deref(), Some("AlreadyExists"));

    // connected but never bound: traffic is refused locally
    let peer = silent_peer().await;
    let answer = state
        .bus
        .dispatch(
            Event::request("smpp.connect")
                .with("connection_id", "raw")
                .with("port", peer as u32),
        )
        .await
        .unwrap();
    assert!(answer.error.is_none());
    let answer = state
        .bus
        .dispatch(Event::request("smpp.submit_sm").with("connection_id", "raw"))
        .await
        .unwrap();
    assert_eq!(answer.error.as_deref(), Some("NotBound"));
}

#[tokio::test]
async fn status_and_listings() {
    let port = next_port();
    let state = state_with(Config::default());
    let answer = state
        .bus
        .dispatch(
            Event::request("smpp.listen")
                .with("listener_id", "main")
                .with("port", port as u32),
        )
        .await
        .unwrap();
    assert!(answer.error.is_none());

    let peer = silent_peer().await;
    let answer = state
        .bus
        .dispatch(
            Event::request("smpp.connect")
                .with("connection_id", "raw")
                .with("port", peer as u32),
        )
        .await
        .unwrap();
    assert!(answer.error.is_none());

    let answer = state.bus.dispatch(Event::request("bus.status")).await.unwrap();
    assert_eq!(
        answer.result,
        Some(json!("listeners:1;connections:1;status:on"))
    );

    let answer = state
        .bus
        .dispatch(Event::request("bus.command").with("line", "smpp listeners"))
        .await
        .unwrap();
    let rows = answer.result.unwrap();
    assert_eq!(rows.as_array().map(Vec::len), Some(1));
    assert_eq!(rows[0]["id"], json!("main"));
    assert_eq!(rows[0]["port"], json!(port));

    let answer = state
        .bus
        .dispatch(Event::request("bus.command").with("line", "smpp connections"))
        .await
        .unwrap();
    let rows = answer.result.unwrap();
    assert_eq!(rows[0]["id"], json!("raw"));
    assert_eq!(rows[0]["bound"], json!(null));

    let answer = state
        .bus
        .dispatch(Event::request("bus.command").with("line", "help"))
        .await
        .unwrap();
    let text = answer.result.unwrap();
    assert!(text.as_str().unwrap().contains("smpp listeners|connections"));
}

#[tokio::test]
async fn configured_connection_binds_at_boot() {
    let port = next_port();
    let upstream = smsc(port).await;

    let state = esme(port, None);
    connector::start_configured(state.clone());

    wait_until("boot connection bound", || is_bound(&state, "up")).await;
    wait_until("upstream side bound", || is_bound(&upstream, "main.1")).await;
    let conn = upstream.connections.get("main.1").await.unwrap();
    assert_eq!(conn.system_id().await.as_deref(), Some("esme1"));
}

#[tokio::test]
async fn connection_restarts_after_disconnect() {
    let port = next_port();
    let _upstream = smsc(port).await;

    let state = esme(port, Some(Duration::from_millis(200)));
    connector::start_configured(state.clone());
    wait_until("initial bind", || is_bound(&state, "up")).await;

    let answer = state
        .bus
        .dispatch(Event::request("smpp.disconnect").with("connection_id", "up"))
        .await
        .unwrap();
    assert!(answer.error.is_none());
    wait_until("teardown", || async {
        state.connections.get("up").await.is_none()
    })
    .await;

    // one restart interval later the dialer comes back and rebinds
    wait_until("automatic restart", || is_bound(&state, "up")).await;
}

#[tokio::test]
async fn remote_unbind_triggers_a_rebind() {
    let port = next_port();
    let upstream = smsc(port).await;

    let state = esme(port, Some(Duration::from_millis(200)));
    connector::start_configured(state.clone());
    wait_until("initial bind", || is_bound(&state, "up")).await;
    wait_until("upstream side bound", || is_bound(&upstream, "main.1")).await;

    let answer = upstream
        .bus
        .dispatch(Event::request("smpp.unbind").with("connection_id", "main.1"))
        .await
        .unwrap();
    assert!(answer.error.is_none(), "unbind failed: {:?}", answer.error);
    assert_eq!(answer.result.unwrap()["command_status"], json!(0));

    // the session stays up, unbound, and rebinds after the restart interval
    assert!(state.connections.get("up").await.is_some());
    assert!(!is_bound(&state, "up").await);
    wait_until("automatic rebind", || is_bound(&state, "up")).await;
}

/// Raw peer that sends an unbind the moment a socket arrives, before any
/// bind could land, and accepts binds afterwards.
async fn unbinding_smsc() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut wire = Framed::new(stream, SmppCodec);
                wire.send(Pdu::unbind(1)).await.ok();
                while let Some(Ok(pdu)) = wire.next().await {
                    if let Some(command) = pdu.command() {
                        if matches!(
                            command,
                            Command::BindTransmitter
                                | Command::BindReceiver
                                | Command::BindTransceiver
                        ) {
                            let _ = wire
                                .send(Pdu::bind_resp(command, 0, pdu.sequence, "smsc"))
                                .await;
                        }
                    }
                }
            });
        }
    });
    port
}

#[tokio::test]
async fn rebind_is_scheduled_even_when_already_unbound() {
    let port = unbinding_smsc().await;

    let state = esme(port, Some(Duration::from_millis(200)));
    let answer = state
        .bus
        .dispatch(Event::request("smpp.connect").with("connection_id", "up"))
        .await
        .unwrap();
    assert!(answer.error.is_none(), "connect failed: {:?}", answer.error);

    // the peer's immediate unbind finds us unbound, yet a rebind still
    // gets scheduled and lands once the restart interval elapses
    wait_until("rebind after unbind", || is_bound(&state, "up")).await;
}
