//! Tokio driver running a [`ConnectionController`] against a real websocket.
//!
//! Every connection and timer is a task that reports back through one
//! channel, so the controller sees events strictly one at a time. Events are
//! tagged with the page generation they belong to; after a reload the driver
//! starts a new controller and drops whatever the old generation still sends.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

use crate::controller::{
    ClientEvent, Command, ConnectionController, ConnectionId, HANDSHAKE_TIMEOUT, Timer,
};

/// The page being kept fresh.
pub trait Page: Send + Sync + 'static {
    /// Reload the page. Called from the driver task.
    fn reload(&self);
}

enum DriverMessage {
    Event { generation: u64, event: ClientEvent },
    Unload,
    Shutdown,
}

type Events = mpsc::UnboundedSender<DriverMessage>;

/// Handle to a running client.
pub struct ClientHandle {
    tx: Events,
    task: JoinHandle<()>,
}

impl ClientHandle {
    /// Tell the controller the page is navigating away.
    pub fn begin_unload(&self) {
        let _ = self.tx.send(DriverMessage::Unload);
    }

    /// Stop all connections and timers and wait for the driver to exit.
    pub async fn shutdown(self) {
        let _ = self.tx.send(DriverMessage::Shutdown);
        let _ = self.task.await;
    }
}

/// Start a client for `url` (e.g. `ws://localhost:5000/__livereload`).
///
/// Must be called from within a tokio runtime.
pub fn spawn(url: impl Into<String>, page: Arc<dyn Page>) -> ClientHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = Session::new(url.into(), page, tx.clone());
    let task = tokio::spawn(session.run(rx));
    ClientHandle { tx, task }
}

struct LiveConnection {
    close: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct Session {
    url: String,
    page: Arc<dyn Page>,
    tx: Events,
    generation: u64,
    controller: ConnectionController,
    timers: HashMap<Timer, JoinHandle<()>>,
    connections: HashMap<ConnectionId, LiveConnection>,
}

impl Session {
    fn new(url: String, page: Arc<dyn Page>, tx: Events) -> Self {
        Self {
            url,
            page,
            tx,
            generation: 0,
            controller: ConnectionController::new(),
            timers: HashMap::new(),
            connections: HashMap::new(),
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<DriverMessage>) {
        tracing::debug!(url = %self.url, "Live reload client started");
        self.start_page();

        while let Some(message) = rx.recv().await {
            match message {
                DriverMessage::Event { generation, event } if generation == self.generation => {
                    self.dispatch(event);
                }
                DriverMessage::Event { .. } => {}
                DriverMessage::Unload => self.dispatch(ClientEvent::UnloadBegin),
                DriverMessage::Shutdown => break,
            }
        }

        self.teardown();
        tracing::debug!(url = %self.url, "Live reload client stopped");
    }

    /// Feed an event and everything it synchronously leads to.
    fn dispatch(&mut self, event: ClientEvent) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let commands = self.controller.handle(event);
            queue.extend(self.execute_all(commands));
        }
    }

    /// Execute commands; returns follow-up events produced synchronously.
    fn execute_all(&mut self, commands: Vec<Command>) -> Vec<ClientEvent> {
        let generation = self.generation;
        let mut follow_up = Vec::new();
        for command in commands {
            if let Some(event) = self.execute(command) {
                follow_up.push(event);
            }
            if self.generation != generation {
                // Reloaded: the rest belongs to the discarded page
                return Vec::new();
            }
        }
        follow_up
    }

    fn execute(&mut self, command: Command) -> Option<ClientEvent> {
        match command {
            Command::Connect(id) => return self.connect(id),
            Command::Close(id) => {
                if let Some(connection) = self.connections.remove(&id) {
                    let _ = connection.close.send(());
                }
            }
            Command::Schedule { timer, after } => {
                let tx = self.tx.clone();
                let generation = self.generation;
                self.start_timer(
                    timer,
                    tokio::spawn(async move {
                        time::sleep(after).await;
                        let _ = tx.send(DriverMessage::Event {
                            generation,
                            event: ClientEvent::TimerFired(timer),
                        });
                    }),
                );
            }
            Command::Repeat { timer, every } => {
                let tx = self.tx.clone();
                let generation = self.generation;
                self.start_timer(
                    timer,
                    tokio::spawn(async move {
                        let mut interval = time::interval_at(Instant::now() + every, every);
                        loop {
                            interval.tick().await;
                            let sent = tx.send(DriverMessage::Event {
                                generation,
                                event: ClientEvent::TimerFired(timer),
                            });
                            if sent.is_err() {
                                break;
                            }
                        }
                    }),
                );
            }
            Command::Cancel(timer) => {
                if let Some(task) = self.timers.remove(&timer) {
                    task.abort();
                }
            }
            Command::Reload => self.reload(),
        }
        None
    }

    fn start_timer(&mut self, timer: Timer, task: JoinHandle<()>) {
        if let Some(previous) = self.timers.insert(timer, task) {
            previous.abort();
        }
    }

    fn connect(&mut self, id: ConnectionId) -> Option<ClientEvent> {
        let request = match self.url.as_str().into_client_request() {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "Invalid live reload URL");
                return Some(ClientEvent::ConnectFailed(id));
            }
        };
        let (close_tx, close_rx) = oneshot::channel();
        let task = tokio::spawn(run_connection(
            request,
            id,
            self.generation,
            self.tx.clone(),
            close_rx,
        ));
        self.connections.insert(
            id,
            LiveConnection {
                close: close_tx,
                task,
            },
        );
        None
    }

    fn reload(&mut self) {
        tracing::info!(url = %self.url, "Reloading page");
        self.page.reload();

        self.teardown();
        self.generation += 1;
        self.controller = ConnectionController::new();
        self.start_page();
    }

    fn start_page(&mut self) {
        let commands = self.controller.start();
        for event in self.execute_all(commands) {
            self.dispatch(event);
        }
    }

    fn teardown(&mut self) {
        for (_, task) in self.timers.drain() {
            task.abort();
        }
        for (_, connection) in self.connections.drain() {
            connection.task.abort();
        }
    }
}

async fn run_connection(
    request: Request,
    id: ConnectionId,
    generation: u64,
    tx: Events,
    mut close: oneshot::Receiver<()>,
) {
    let report = |event| {
        let _ = tx.send(DriverMessage::Event { generation, event });
    };

    let handshake = tokio::select! {
        _ = &mut close => return,
        result = time::timeout(HANDSHAKE_TIMEOUT, tokio_tungstenite::connect_async(request)) => result,
    };
    let mut ws = match handshake {
        Ok(Ok((ws, _))) => ws,
        Ok(Err(e)) => {
            tracing::debug!(?id, error = %e, "Live reload connection failed");
            report(ClientEvent::Errored(id));
            report(ClientEvent::Closed(id));
            return;
        }
        Err(_) => {
            tracing::debug!(?id, timeout = ?HANDSHAKE_TIMEOUT, "Live reload handshake timed out");
            report(ClientEvent::Errored(id));
            report(ClientEvent::Closed(id));
            return;
        }
    };
    report(ClientEvent::Opened(id));

    loop {
        tokio::select! {
            _ = &mut close => {
                let _ = ws.close(None).await;
                return;
            }
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => report(ClientEvent::Message(id, text)),
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(?id, error = %e, "Live reload connection error");
                    report(ClientEvent::Errored(id));
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }
    report(ClientEvent::Closed(id));
}
