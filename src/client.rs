//! Connection supervisor: owns the TCP session, drives the handshake, and
//! runs the reconnection policy.
//!
//! One spawned task per session is the sole reader and writer of the socket.
//! Callers hand it validated commands through a bounded queue and observe
//! everything else through events and state snapshots, so nothing on the
//! caller side ever blocks on the device.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::command::{CommandEncoder, CommandError, WireCommand};
use crate::config::EngineConfig;
use crate::events::{EventBus, HubEvent, PortKind};
use crate::protocol::{HubFrame, VideohubCodec};
use crate::state::{LabelTables, StateStore};

// Session lifecycle. Commands are accepted only in `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingPrelude,
    Ready,
}

// Handle to the supervisor task of the current session
struct Session {
    cancel: CancellationToken,
    outbound: mpsc::Sender<WireCommand>,
    task: JoinHandle<()>,
}

// Client for one Videohub device. Cheap to share behind an `Arc`; every
// method takes `&self`.
pub struct VideohubClient {
    cfg: EngineConfig,
    encoder: CommandEncoder,
    store: Arc<StateStore>,
    events: EventBus,
    conn: Arc<watch::Sender<ConnectionState>>,
    session: Mutex<Option<Session>>,
}

impl VideohubClient {
    pub fn new(cfg: EngineConfig) -> Self {
        let encoder = CommandEncoder::new(&cfg);
        let store = Arc::new(StateStore::new(&cfg));
        let events = EventBus::new(cfg.event_capacity);
        let (conn, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            cfg,
            encoder,
            store,
            events,
            conn: Arc::new(conn),
            session: Mutex::new(None),
        }
    }

    // Connect once; a lost connection stays lost until connect is called again
    pub async fn connect(&self, host: &str, port: u16) {
        self.start(host, port, false).await;
    }

    // Connect and keep reconnecting with exponential backoff until the
    // attempt budget is exhausted or `disconnect` is called
    pub async fn connect_with_auto_reconnect(&self, host: &str, port: u16) {
        self.start(host, port, true).await;
    }

    async fn start(&self, host: &str, port: u16, auto_reconnect: bool) {
        // Calling connect again re-targets the session and resets the
        // reconnect attempt counter
        self.disconnect().await;

        let cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.cfg.command_queue_depth);
        let supervisor = Supervisor {
            host: host.to_string(),
            port,
            cfg: self.cfg.clone(),
            store: Arc::clone(&self.store),
            events: self.events.clone(),
            conn: Arc::clone(&self.conn),
            cancel: cancel.clone(),
            auto_reconnect,
        };
        let task = tokio::spawn(supervisor.run(outbound_rx));
        *self.session.lock().unwrap() = Some(Session {
            cancel,
            outbound: outbound_tx,
            task,
        });
    }

    // Tear the session down. When this returns the supervisor task has
    // exited: no further writes, no pending reconnect timer.
    pub async fn disconnect(&self) {
        let session = self.session.lock().unwrap().take();
        if let Some(session) = session {
            session.cancel.cancel();
            let _ = session.task.await;
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.conn.borrow()
    }

    // Watch connection transitions without consuming the event stream
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.conn.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    pub fn current_routes(&self) -> HashMap<u32, u32> {
        self.store.routes()
    }

    pub fn current_labels(&self) -> LabelTables {
        self.store.labels()
    }

    // Device-provided label, falling back to the configured defaults
    pub fn label_for(&self, kind: PortKind, index: u32) -> Option<String> {
        self.store.label(kind, index).or_else(|| {
            self.cfg
                .default_labels
                .get(kind, index)
                .map(str::to_string)
        })
    }

    // Route one output to one input. The local table is not touched here;
    // it changes when the device echoes the section back.
    pub fn set_route(&self, output: u32, input: u32) -> Result<(), CommandError> {
        let cmd = self.encoder.set_route(output, input)?;
        self.dispatch(cmd)
    }

    pub fn set_routes(&self, routes: &HashMap<u32, u32>) -> Result<(), CommandError> {
        let cmd = self.encoder.set_routes(routes)?;
        self.dispatch(cmd)
    }

    pub fn set_label(&self, kind: PortKind, index: u32, name: &str) -> Result<(), CommandError> {
        let cmd = self.encoder.set_label(kind, index, name)?;
        self.dispatch(cmd)
    }

    fn dispatch(&self, cmd: WireCommand) -> Result<(), CommandError> {
        if *self.conn.borrow() != ConnectionState::Ready {
            return Err(CommandError::NotReady);
        }
        let session = self.session.lock().unwrap();
        let Some(session) = session.as_ref() else {
            return Err(CommandError::NotReady);
        };
        session.outbound.try_send(cmd).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => CommandError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => CommandError::NotReady,
        })
    }
}

// Why a session loop iteration ended
enum SessionEnd {
    Cancelled,
    ClientGone,
    ConnectionLost,
}

struct Supervisor {
    host: String,
    port: u16,
    cfg: EngineConfig,
    store: Arc<StateStore>,
    events: EventBus,
    conn: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
    auto_reconnect: bool,
}

impl Supervisor {
    async fn run(self, mut outbound: mpsc::Receiver<WireCommand>) {
        let mut attempts: u32 = 0;
        loop {
            self.set_state(ConnectionState::Connecting);
            let stream = tokio::select! {
                _ = self.cancel.cancelled() => None,
                result = tokio::time::timeout(
                    self.cfg.connect_timeout,
                    TcpStream::connect((self.host.as_str(), self.port)),
                ) => match result {
                    Ok(Ok(stream)) => Some(stream),
                    Ok(Err(err)) => {
                        log::warn!("connect to {}:{} failed: {}", self.host, self.port, err);
                        None
                    }
                    Err(_) => {
                        log::warn!("connect to {}:{} timed out", self.host, self.port);
                        None
                    }
                },
            };

            if let Some(stream) = stream {
                log::info!("connected to videohub at {}:{}", self.host, self.port);
                self.set_state(ConnectionState::AwaitingPrelude);
                // Commands left over from a previous connection must not
                // replay onto this one
                while outbound.try_recv().is_ok() {}
                let framed = Framed::new(stream, VideohubCodec::new());
                match self.drive(framed, &mut outbound, &mut attempts).await {
                    SessionEnd::Cancelled | SessionEnd::ClientGone => {
                        self.set_state(ConnectionState::Disconnected);
                        return;
                    }
                    SessionEnd::ConnectionLost => {}
                }
            }

            self.set_state(ConnectionState::Disconnected);
            if self.cancel.is_cancelled() || !self.auto_reconnect {
                return;
            }
            if attempts >= self.cfg.max_reconnect_attempts {
                log::error!(
                    "giving up on {}:{} after {} reconnect attempts",
                    self.host,
                    self.port,
                    attempts
                );
                self.events.publish(HubEvent::ReconnectsExhausted { attempts });
                return;
            }
            let delay = reconnect_delay(&self.cfg, attempts);
            attempts += 1;
            log::info!(
                "reconnecting to {}:{} in {:?} (attempt {})",
                self.host,
                self.port,
                delay,
                attempts
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            // The timer may have been pending when disconnect was requested
            if self.cancel.is_cancelled() {
                return;
            }
        }
    }

    // Read/write loop for one established connection. Returns once the
    // socket is gone, the handshake timed out, or the session was cancelled.
    async fn drive(
        &self,
        mut framed: Framed<TcpStream, VideohubCodec>,
        outbound: &mut mpsc::Receiver<WireCommand>,
        attempts: &mut u32,
    ) -> SessionEnd {
        let handshake = tokio::time::sleep(self.cfg.handshake_timeout);
        tokio::pin!(handshake);
        let mut ready = false;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return SessionEnd::Cancelled;
                }
                _ = &mut handshake, if !ready => {
                    log::warn!(
                        "no prelude from {}:{} within {:?}",
                        self.host,
                        self.port,
                        self.cfg.handshake_timeout
                    );
                    return SessionEnd::ConnectionLost;
                }
                cmd = outbound.recv(), if ready => {
                    let Some(cmd) = cmd else {
                        log::debug!("command channel closed, ending session");
                        return SessionEnd::ClientGone;
                    };
                    log::debug!("sending command: {:?}", cmd.as_str());
                    if let Err(err) = framed.send(cmd).await {
                        log::warn!("write to videohub failed: {}", err);
                        return SessionEnd::ConnectionLost;
                    }
                }
                frame = framed.next() => match frame {
                    Some(Ok(frame)) => self.handle_frame(frame, &mut ready, attempts),
                    Some(Err(err)) => {
                        log::warn!("read from videohub failed: {}", err);
                        return SessionEnd::ConnectionLost;
                    }
                    None => {
                        log::info!("videohub closed the connection");
                        return SessionEnd::ConnectionLost;
                    }
                },
            }
        }
    }

    fn handle_frame(&self, frame: HubFrame, ready: &mut bool, attempts: &mut u32) {
        match frame {
            HubFrame::Ack => {
                log::debug!("ACK received");
                self.events.publish(HubEvent::Ack);
            }
            HubFrame::PreludeEnd => {
                if !*ready {
                    *ready = true;
                    *attempts = 0;
                    log::info!("prelude complete, link is ready");
                    self.set_state(ConnectionState::Ready);
                }
            }
            HubFrame::Section { name, lines } => {
                // Prelude sections and live updates are folded identically
                for event in self.store.apply_section(&name, &lines) {
                    self.events.publish(event);
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.conn.send_replace(state);
        if previous != state {
            self.events.publish(HubEvent::Connection { state });
        }
    }
}

// Exponential backoff with a cap; attempts reset on every Ready transition
pub(crate) fn reconnect_delay(cfg: &EngineConfig, attempts: u32) -> Duration {
    let exp = cfg.reconnect_base.as_millis() as f64 * cfg.reconnect_growth.powi(attempts as i32);
    let capped = exp.min(cfg.reconnect_cap.as_millis() as f64);
    Duration::from_millis(capped as u64)
}
