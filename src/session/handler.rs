use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;
use tracing::{debug, info, span, warn, Instrument, Level};
use uuid::Uuid;

use super::{decision_status, BindRole, Connection, SessionError};
use crate::bootstrap::SharedServerState;
use crate::bus::{Direction, Event};
use crate::connector;
use crate::proto::{Command, Pdu, SmppCodec, Status};

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Drives one TCP connection: decodes frames, translates them to bus
/// events, and writes whatever the connection's outbox carries. PDUs are
/// handled one at a time; an awaited dispatch pauses the read side, which
/// is the connection's backpressure.
pub struct Session {
    state: SharedServerState,
    conn: Arc<Connection>,
}

impl Session {
    /// Take ownership of an established socket and run it to completion on
    /// its own task.
    pub fn spawn(
        state: SharedServerState,
        conn: Arc<Connection>,
        stream: TcpStream,
        outbox_rx: mpsc::Receiver<Pdu>,
    ) {
        let span = span!(
            Level::INFO,
            "session",
            connection_id = %conn.id,
            peer = %conn.peer_addr,
            direction = %conn.direction,
        );
        let session = Session { state, conn };
        tokio::spawn(session.run(stream, outbox_rx).instrument(span));
    }

    async fn run(self, stream: TcpStream, outbox_rx: mpsc::Receiver<Pdu>) {
        let framed = Framed::new(stream, SmppCodec);
        let (sink, source) = framed.split();

        let writer = tokio::spawn(Self::write_loop(
            sink,
            outbox_rx,
            self.conn.closed_signal(),
        ));

        self.read_loop(source).await;

        self.conn.request_close();
        let _ = writer.await;
        self.teardown().await;
    }

    async fn read_loop(&self, mut source: SplitStream<Framed<TcpStream, SmppCodec>>) {
        let mut shutdown_rx = self.state.shutdown.subscribe();
        let mut close_rx = self.conn.closed_signal();
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    debug!("shutdown signalled, closing session");
                    break;
                }

                _ = close_rx.changed() => {
                    debug!("close requested");
                    break;
                }

                frame = source.next() => match frame {
                    Some(Ok(pdu)) => {
                        if let Err(err) = self.handle_pdu(pdu).await {
                            debug!(error = %err, "session write failed");
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "protocol error, closing connection");
                        self.state.bus.enqueue(
                            Event::notice("smpp.error")
                                .with("connection_id", self.conn.id.clone())
                                .with("error", err.to_string()),
                        );
                        break;
                    }
                    None => {
                        debug!("peer closed connection");
                        break;
                    }
                },

                _ = sweep.tick() => {
                    let reaped = self.conn.sweep_pending().await;
                    if reaped > 0 {
                        warn!(reaped, "timed out pending requests");
                        metrics::counter!("smpp_request_timeouts_total").increment(reaped as u64);
                    }
                }
            }
        }
    }

    async fn write_loop(
        mut sink: SplitSink<Framed<TcpStream, SmppCodec>, Pdu>,
        mut outbox: mpsc::Receiver<Pdu>,
        mut close_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = close_rx.changed() => {
                    // flush whatever was queued before the close was asked for
                    while let Ok(pdu) = outbox.try_recv() {
                        if sink.send(pdu).await.is_err() {
                            break;
                        }
                    }
                    break;
                }

                pdu = outbox.recv() => match pdu {
                    Some(pdu) => {
                        metrics::counter!("smpp_pdus_sent_total").increment(1);
                        if let Err(err) = sink.send(pdu).await {
                            debug!(error = %err, "write failed");
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        let _ = sink.close().await;
    }

    /// Handle one decoded PDU. Requests that need a decision block the read
    /// side until the bus answers.
    async fn handle_pdu(&self, pdu: Pdu) -> Result<(), SessionError> {
        metrics::counter!("smpp_pdus_received_total").increment(1);

        let Some(command) = pdu.command() else {
            warn!(command_id = format_args!("{:#010x}", pdu.command), "unknown command id");
            return self
                .conn
                .send(Pdu::generic_nack(
                    Status::InvalidCommandId.as_u32(),
                    pdu.sequence,
                ))
                .await;
        };

        if command.is_response() {
            return self.handle_response(command, pdu).await;
        }

        match command {
            Command::EnquireLink => {
                self.conn.send(Pdu::enquire_link_resp(pdu.sequence)).await
            }
            Command::BindTransmitter | Command::BindReceiver | Command::BindTransceiver => {
                self.handle_bind(command, pdu).await
            }
            Command::SubmitSm | Command::DeliverSm => self.handle_message(command, pdu).await,
            Command::Unbind => self.handle_unbind(pdu).await,
            _ => {
                warn!(command = command.name(), "unsupported command");
                self.state.bus.enqueue(
                    Event::new(format!("smpp.{}", command.name()), Direction::Incoming)
                        .with("connection_id", self.conn.id.clone())
                        .with_fields(pdu.to_fields()),
                );
                self.conn
                    .send(Pdu::generic_nack(
                        Status::InvalidCommandId.as_u32(),
                        pdu.sequence,
                    ))
                    .await
            }
        }
    }

    /// Responses settle the pending request with the same sequence number.
    /// An unsolicited response is published as a notice instead.
    async fn handle_response(&self, command: Command, pdu: Pdu) -> Result<(), SessionError> {
        // a successful response to a bind we sent moves this connection to
        // bound, whether or not anyone still waits for it
        if pdu.status == 0 {
            if let Some(role) = BindRole::from_command(command) {
                let system_id = pdu
                    .to_fields()
                    .get("system_id")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.conn.set_bound(role, &system_id).await;
                info!(system_id = %system_id, role = %role, "bound to peer");
                metrics::counter!("smpp_binds_total").increment(1);
            }
        }

        let sequence = pdu.sequence;
        if !self.conn.resolve_pending(sequence, pdu.clone()).await {
            debug!(command = command.name(), sequence, "unsolicited response");
        }
        self.state.bus.enqueue(
            Event::new(format!("smpp.{}", command.name()), Direction::Incoming)
                .with("connection_id", self.conn.id.clone())
                .with_fields(pdu.to_fields()),
        );
        Ok(())
    }

    /// A bind is always re-decided, even on an already-bound connection; a
    /// status-0 decision overwrites the role, so a peer may rebind without
    /// its counterpart having observed the unbind.
    async fn handle_bind(&self, command: Command, pdu: Pdu) -> Result<(), SessionError> {
        let fields = request_fields(&pdu);
        let peer_system_id = fields
            .get("system_id")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();

        let event = Event::new(format!("smpp.{}", command.name()), Direction::Incoming)
            .with("connection_id", self.conn.id.clone())
            .with_fields(self.conn.endpoint_fields())
            .with_fields(fields);

        let answer = match self.state.bus.dispatch(event).await {
            Ok(answer) => answer,
            Err(_) => {
                return self
                    .conn
                    .send(Pdu::bind_resp(
                        command,
                        Status::BindFailed.as_u32(),
                        pdu.sequence,
                        "",
                    ))
                    .await
            }
        };

        let status = decision_status(&answer, Status::BindFailed.as_u32());
        self.conn
            .send(Pdu::bind_resp(command, status, pdu.sequence, &peer_system_id))
            .await?;

        if status == 0 {
            // from_command is infallible for the three bind requests
            if let Some(role) = BindRole::from_command(command) {
                self.conn.set_bound(role, &peer_system_id).await;
            }
            info!(system_id = %peer_system_id, bind = command.name(), "peer bound");
            metrics::counter!("smpp_binds_total").increment(1);
        } else {
            info!(
                system_id = %peer_system_id,
                status = format_args!("{status:#x}"),
                "bind rejected, closing connection"
            );
            self.conn.request_close();
        }
        Ok(())
    }

    async fn handle_message(&self, command: Command, pdu: Pdu) -> Result<(), SessionError> {
        let status_on_unbound = Status::IncorrectBindStatus.as_u32();

        if !self.conn.is_bound().await {
            // still published so an operator can see traffic from broken
            // peers, but pre-answered: no decision is asked for
            let mut event = Event::new(format!("smpp.{}", command.name()), Direction::Incoming)
                .with("connection_id", self.conn.id.clone())
                .with_fields(pdu.to_fields());
            event.set("command_status", status_on_unbound);
            event.handled = true;
            self.state.bus.enqueue(event);

            return self
                .conn
                .send(Pdu::message_resp(
                    command,
                    status_on_unbound,
                    pdu.sequence,
                    &Uuid::new_v4().to_string(),
                ))
                .await;
        }

        let event = Event::new(format!("smpp.{}", command.name()), Direction::Incoming)
            .with("connection_id", self.conn.id.clone())
            .with_fields(request_fields(&pdu));

        let answer = match self.state.bus.dispatch(event).await {
            Ok(answer) => answer,
            Err(_) => {
                return self
                    .conn
                    .send(Pdu::message_resp(
                        command,
                        Pdu::failure_status(command),
                        pdu.sequence,
                        "",
                    ))
                    .await
            }
        };

        let status = decision_status(&answer, Pdu::failure_status(command));
        let message_id = minted_message_id(&answer);

        metrics::counter!("smpp_messages_total", "command" => command.name()).increment(1);
        self.conn
            .send(Pdu::message_resp(command, status, pdu.sequence, &message_id))
            .await
    }

    async fn handle_unbind(&self, pdu: Pdu) -> Result<(), SessionError> {
        if !self.conn.is_bound().await {
            let mut event = Event::new("smpp.unbind", Direction::Incoming)
                .with("connection_id", self.conn.id.clone());
            event.set("command_status", Status::IncorrectBindStatus.as_u32());
            event.handled = true;
            self.state.bus.enqueue(event);

            self.conn
                .send(Pdu::unbind_resp(
                    Status::IncorrectBindStatus.as_u32(),
                    pdu.sequence,
                ))
                .await?;
        } else {
            let event = Event::new("smpp.unbind", Direction::Incoming)
                .with("connection_id", self.conn.id.clone());
            let status = match self.state.bus.dispatch(event).await {
                // an unbind defaults to success; handlers may still nack it
                Ok(answer) => decision_status(&answer, 0),
                Err(_) => 0,
            };

            // the peer is leaving either way
            self.conn.clear_bound().await;
            self.conn.send(Pdu::unbind_resp(status, pdu.sequence)).await?;
            info!("peer unbound");
        }

        // an outbound connection with restart configured rebinds on its own,
        // whatever state the unbind found it in; the timer re-checks at fire
        // time
        if self.conn.direction == Direction::Outgoing {
            if let Some(cfg) = self.state.config.connection.get(&self.conn.id) {
                if cfg.enabled && cfg.restart.is_some() {
                    connector::schedule_rebind(
                        self.state.clone(),
                        self.conn.id.clone(),
                        self.conn.epoch,
                        cfg.clone(),
                    );
                }
            }
        }
        Ok(())
    }

    /// Runs exactly once, after both halves of the socket are done.
    async fn teardown(&self) {
        self.conn.fail_pending().await;
        let removed = self
            .state
            .connections
            .remove_if(&self.conn.id, self.conn.epoch)
            .await
            .is_some();

        let mut notice = Event::notice("smpp.disconnect")
            .with("connection_id", self.conn.id.clone())
            .with_fields(self.conn.endpoint_fields());
        if let Some(listener_id) = &self.conn.listener_id {
            notice.set("listener_id", listener_id.clone());
        }
        self.state.bus.enqueue(notice);
        metrics::counter!("smpp_disconnects_total").increment(1);
        metrics::gauge!("smpp_connections_active").decrement(1.0);
        info!("session closed");

        let shutting_down = *self.state.shutdown.subscribe().borrow();
        if removed && !shutting_down && self.conn.direction == Direction::Outgoing {
            if let Some(cfg) = self.state.config.connection.get(&self.conn.id) {
                if cfg.enabled && cfg.restart.is_some() {
                    connector::schedule_restart(
                        self.state.clone(),
                        self.conn.id.clone(),
                        cfg.clone(),
                    );
                }
            }
        }
    }
}

/// Fields of an incoming request, for a decision event. The request's own
/// status header is always zero and must not pre-empt the decision's
/// `command_status`, so it is stripped.
fn request_fields(pdu: &Pdu) -> serde_json::Map<String, serde_json::Value> {
    let mut fields = pdu.to_fields();
    fields.remove("command_status");
    fields
}

/// The acknowledged message id: the decision's `message_id` event field
/// when one was supplied, a freshly minted UUID otherwise.
fn minted_message_id(event: &Event) -> String {
    match event.get_str("message_id") {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => Uuid::new_v4().to_string(),
    }
}
