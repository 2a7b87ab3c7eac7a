//! Inbound session lifecycle tests: accept policy, bind negotiation,
//! traffic gating and the bind timeout, exercised over real loopback
//! sockets.
//!
//! Run with: cargo test --test session_lifecycle

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use smpplink::bootstrap::{Server, SharedServerState};
use smpplink::bus::{Event, EventHandler};
use smpplink::config::{Config, ListenerConfig};
use smpplink::proto::{BindBody, Body, Command, MessageBody, Pdu, SmppCodec};

/// Port allocator for tests
static PORT: AtomicU16 = AtomicU16::new(29200);

fn next_port() -> u16 {
    PORT.fetch_add(1, Ordering::SeqCst)
}

/// Bus handler that answers every unanswered event with a fixed result.
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

/// Server state with one configured listener on a fresh port.
fn harness(bind_timeout: Duration) -> (SharedServerState, u16) {
    let port = next_port();
    let mut config = Config::default();
    config.listener.insert(
        "main".to_string(),
        ListenerConfig {
            port,
            bind_timeout,
            ..Default::default()
        },
    );
    (Server::new(config).state(), port)
}

async fn start_listener(state: &SharedServerState) {
    let answer = state
        .bus
        .dispatch(Event::request("smpp.listen").with("listener_id", "main"))
        .await
        .unwrap();
    assert!(answer.error.is_none(), "listen failed: {:?}", answer.error);
}

async fn client(port: u16) -> Framed<TcpStream, SmppCodec> {
    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    Framed::new(stream, SmppCodec)
}

async fn send_recv(wire: &mut Framed<TcpStream, SmppCodec>, pdu: Pdu) -> Pdu {
    wire.send(pdu).await.unwrap();
    timeout(Duration::from_secs(2), wire.next())
        .await
        .expect("no response within deadline")
        .expect("connection closed")
        .expect("protocol error")
}

async fn expect_eof(wire: &mut Framed<TcpStream, SmppCodec>) {
    let frame = timeout(Duration::from_secs(2), wire.next())
        .await
        .expect("connection not closed within deadline");
    assert!(frame.is_none() || frame.unwrap().is_err());
}

fn bind_pdu(command: Command, sequence: u32) -> Pdu {
    Pdu::new(
        command,
        0,
        sequence,
        Body::Bind(BindBody {
            system_id: "tester".into(),
            password: "secret".into(),
            interface_version: 0x34,
            ..Default::default()
        }),
    )
}

fn bind_transceiver(sequence: u32) -> Pdu {
    bind_pdu(Command::BindTransceiver, sequence)
}

fn submit_sm(sequence: u32) -> Pdu {
    Pdu::new(
        Command::SubmitSm,
        0,
        sequence,
        Body::Message(MessageBody {
            source_addr: "1000".into(),
            destination_addr: "2000".into(),
            short_message: bytes::Bytes::from_static(b"hi"),
            ..Default::default()
        }),
    )
}

#[tokio::test]
async fn unanswered_connect_decision_rejects() {
    let (state, port) = harness(Duration::from_secs(10));
    start_listener(&state).await;

    // no handler answers smpp.connect, so admission fails closed
    let mut wire = client(port).await;
    expect_eof(&mut wire).await;
    assert_eq!(state.connections.len().await, 0);
}

#[tokio::test]
async fn unrecognised_connect_decision_rejects() {
    let (state, port) = harness(Duration::from_secs(10));
    state.bus.install("smpp.connect", decide(1u32));
    start_listener(&state).await;

    let mut wire = client(port).await;
    expect_eof(&mut wire).await;
}

#[tokio::test]
async fn bind_then_submit_round_trip() {
    let (state, port) = harness(Duration::from_secs(10));
    state.bus.install("smpp.connect", decide(true));
    state.bus.install("smpp.bind_transceiver", decide(true));
    state.bus.install("smpp.submit_sm", Arc::new(Issue("m-42")));
    start_listener(&state).await;

    let mut wire = client(port).await;

    let resp = send_recv(&mut wire, bind_transceiver(1)).await;
    assert_eq!(resp.command(), Some(Command::BindTransceiverResp));
    assert_eq!(resp.status, 0);
    assert_eq!(resp.sequence, 1);

    let resp = send_recv(&mut wire, submit_sm(2)).await;
    assert_eq!(resp.command(), Some(Command::SubmitSmResp));
    assert_eq!(resp.status, 0);
    assert_eq!(resp.sequence, 2);
    match resp.body {
        Body::MessageResp(body) => assert_eq!(body.message_id, "m-42"),
        other => panic!("unexpected body: {other:?}"),
    }

    let conn = state.connections.get("main.1").await.unwrap();
    assert!(conn.is_bound().await);
    assert_eq!(conn.system_id().await.as_deref(), Some("tester"));
}

#[tokio::test]
async fn submit_without_decision_handler_is_nacked() {
    let (state, port) = harness(Duration::from_secs(10));
    state.bus.install("smpp.connect", decide(true));
    state.bus.install("smpp.bind_transceiver", decide(true));
    start_listener(&state).await;

    let mut wire = client(port).await;
    let resp = send_recv(&mut wire, bind_transceiver(1)).await;
    assert_eq!(resp.status, 0);

    // nobody answers smpp.submit_sm: default failure status applies
    let resp = send_recv(&mut wire, submit_sm(2)).await;
    assert_eq!(resp.command(), Some(Command::SubmitSmResp));
    assert_eq!(resp.status, 0x45);
}

#[tokio::test]
async fn unbound_submit_is_answered_without_a_decision() {
    let (state, port) = harness(Duration::from_secs(10));
    state.bus.install("smpp.connect", decide(true));
    // if the dispatcher were consulted it would approve, which must not
    // happen on an unbound session
    state.bus.install("smpp.submit_sm", decide(true));
    start_listener(&state).await;

    let mut observer = state.bus.observe();
    let mut wire = client(port).await;

    let resp = send_recv(&mut wire, submit_sm(1)).await;
    assert_eq!(resp.command(), Some(Command::SubmitSmResp));
    assert_eq!(resp.status, 0x04);
    match resp.body {
        Body::MessageResp(body) => assert!(!body.message_id.is_empty()),
        other => panic!("unexpected body: {other:?}"),
    }

    // the published event carries the pre-set status and asks for nothing
    let seen = loop {
        let ev = timeout(Duration::from_secs(2), observer.recv())
            .await
            .expect("no event observed")
            .unwrap();
        if ev.name == "smpp.submit_sm" {
            break ev;
        }
    };
    assert!(seen.handled);
    assert_eq!(seen.get_u32("command_status"), Some(0x04));
}

#[tokio::test]
async fn rejected_bind_closes_the_connection() {
    let (state, port) = harness(Duration::from_secs(10));
    state.bus.install("smpp.connect", decide(true));
    state.bus.install("smpp.bind_transceiver", decide(false));
    start_listener(&state).await;

    let mut wire = client(port).await;
    let resp = send_recv(&mut wire, bind_transceiver(1)).await;
    assert_eq!(resp.command(), Some(Command::BindTransceiverResp));
    assert_eq!(resp.status, 0x0D);
    expect_eof(&mut wire).await;
}

#[tokio::test]
async fn explicit_status_from_decision_passes_verbatim() {
    let (state, port) = harness(Duration::from_secs(10));
    state.bus.install("smpp.connect", decide(true));
    state.bus.install("smpp.bind_transceiver", decide(true));
    // throttled: ESME_RTHROTTLED as a numeric result
    state.bus.install("smpp.submit_sm", decide(0x58u32));
    start_listener(&state).await;

    let mut wire = client(port).await;
    send_recv(&mut wire, bind_transceiver(1)).await;
    let resp = send_recv(&mut wire, submit_sm(2)).await;
    assert_eq!(resp.status, 0x58);
}

#[tokio::test]
async fn enquire_link_is_answered_locally() {
    let (state, port) = harness(Duration::from_secs(10));
    state.bus.install("smpp.connect", decide(true));
    start_listener(&state).await;

    // works even unbound: keep-alives are exempt from the bind gate
    let mut wire = client(port).await;
    let resp = send_recv(&mut wire, Pdu::new(Command::EnquireLink, 0, 7, Body::Empty)).await;
    assert_eq!(resp.command(), Some(Command::EnquireLinkResp));
    assert_eq!(resp.sequence, 7);
}

#[tokio::test]
async fn bind_timeout_force_closes_with_one_disconnect() {
    let (state, port) = harness(Duration::from_millis(250));
    state.bus.install("smpp.connect", decide(true));
    start_listener(&state).await;

    let mut observer = state.bus.observe();
    let mut wire = client(port).await;

    // never bind; the listener's timer must close us
    expect_eof(&mut wire).await;

    let mut disconnects = 0;
    while let Ok(Ok(ev)) = timeout(Duration::from_millis(500), observer.recv()).await {
        if ev.name == "smpp.disconnect" && ev.get_str("connection_id") == Some("main.1") {
            disconnects += 1;
        }
    }
    assert_eq!(disconnects, 1);
    assert_eq!(state.connections.len().await, 0);
}

#[tokio::test]
async fn bound_peer_survives_the_bind_timeout() {
    let (state, port) = harness(Duration::from_millis(250));
    state.bus.install("smpp.connect", decide(true));
    state.bus.install("smpp.bind_transceiver", decide(true));
    start_listener(&state).await;

    let mut wire = client(port).await;
    send_recv(&mut wire, bind_transceiver(1)).await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    let resp = send_recv(&mut wire, Pdu::new(Command::EnquireLink, 0, 2, Body::Empty)).await;
    assert_eq!(resp.command(), Some(Command::EnquireLinkResp));
}

#[tokio::test]
async fn closing_a_listener_keeps_its_sessions() {
    let (state, port) = harness(Duration::from_secs(10));
    state.bus.install("smpp.connect", decide(true));
    state.bus.install("smpp.bind_transceiver", decide(true));
    start_listener(&state).await;

    let mut wire = client(port).await;
    send_recv(&mut wire, bind_transceiver(1)).await;

    let answer = state
        .bus
        .dispatch(Event::request("smpp.unlisten").with("listener_id", "main"))
        .await
        .unwrap();
    assert!(answer.error.is_none());

    // the accept socket is gone
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());

    // but the established session still answers
    let resp = send_recv(&mut wire, Pdu::new(Command::EnquireLink, 0, 2, Body::Empty)).await;
    assert_eq!(resp.command(), Some(Command::EnquireLinkResp));
}

#[tokio::test]
async fn bind_on_a_bound_connection_is_redecided() {
    use smpplink::session::BindRole;

    let (state, port) = harness(Duration::from_secs(10));
    state.bus.install("smpp.connect", decide(true));
    state.bus.install("smpp.bind_transceiver", decide(true));
    state.bus.install("smpp.bind_transmitter", decide(true));
    start_listener(&state).await;

    let mut wire = client(port).await;
    let resp = send_recv(&mut wire, bind_transceiver(1)).await;
    assert_eq!(resp.status, 0);

    // a second bind is decided afresh and replaces the role
    let resp = send_recv(&mut wire, bind_pdu(Command::BindTransmitter, 2)).await;
    assert_eq!(resp.command(), Some(Command::BindTransmitterResp));
    assert_eq!(resp.status, 0);

    let conn = state.connections.get("main.1").await.unwrap();
    assert_eq!(conn.bind_role().await, Some(BindRole::Transmitter));
}

#[tokio::test]
async fn unbind_clears_bound_state() {
    let (state, port) = harness(Duration::from_secs(10));
    state.bus.install("smpp.connect", decide(true));
    state.bus.install("smpp.bind_transceiver", decide(true));
    state.bus.install("smpp.unbind", decide(true));
    start_listener(&state).await;

    let mut wire = client(port).await;
    send_recv(&mut wire, bind_transceiver(1)).await;

    let conn = state.connections.get("main.1").await.unwrap();
    assert!(conn.is_bound().await);

    let resp = send_recv(&mut wire, Pdu::unbind(2)).await;
    assert_eq!(resp.command(), Some(Command::UnbindResp));
    assert_eq!(resp.status, 0);
    assert!(!conn.is_bound().await);
    assert!(conn.system_id().await.is_none());
}
