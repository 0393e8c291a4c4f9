//! Client connection state machine.
//!
//! [`ConnectionController`] performs no I/O. It consumes [`ClientEvent`]s and
//! returns the [`Command`]s its driver must carry out, which keeps every
//! transition testable without sockets or clocks.

use std::time::Duration;

use lr_protocol::RefreshMessage;

/// Wait after page load before the first connection attempt.
pub const STARTUP_GRACE: Duration = Duration::from_millis(500);

/// Cadence of reconnect probes while the server is unreachable.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Longest a connection attempt may take to complete its handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a navigating page suppresses reconnects.
pub const UNLOAD_GRACE: Duration = Duration::from_millis(2500);

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing attempted yet.
    Disconnected,
    /// First connection (retry enabled) in flight.
    Connecting,
    /// Connected and listening for refresh messages.
    Open,
    /// Connection lost; probing for the server to come back.
    Retrying,
    /// The page is navigating away; connection loss is expected.
    SuspendedForNavigation,
}

/// Identifies one connection attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

/// Timers the controller asks its driver to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Timer {
    StartupGrace,
    RetryProbe,
    UnloadGrace,
    Reload,
}

/// Input to the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// A scheduled or repeating timer fired.
    TimerFired(Timer),
    /// The connection could not even be constructed (e.g. invalid URL).
    ConnectFailed(ConnectionId),
    /// The connection is open and ready.
    Opened(ConnectionId),
    /// A text frame arrived.
    Message(ConnectionId, String),
    /// The connection reported an error.
    Errored(ConnectionId),
    /// The connection closed.
    Closed(ConnectionId),
    /// The page began navigating away.
    UnloadBegin,
}

/// Output of the controller, executed by the driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Open a connection under this id.
    Connect(ConnectionId),
    /// Close (or abandon) a connection.
    Close(ConnectionId),
    /// Fire `timer` once after `after`, replacing a previous schedule.
    Schedule { timer: Timer, after: Duration },
    /// Fire `timer` every `every`, first firing after one period.
    Repeat { timer: Timer, every: Duration },
    /// Stop a timer if it is running.
    Cancel(Timer),
    /// Reload the page.
    Reload,
}

#[derive(Clone, Copy, Debug)]
struct Connection {
    id: ConnectionId,
    /// Whether losing this connection starts the retry loop. Probes don't.
    retry: bool,
}

/// Connection controller for one page load.
#[derive(Debug)]
pub struct ConnectionController {
    state: ConnectionState,
    started: bool,
    next_id: u64,
    current: Option<Connection>,
    probing: bool,
    reload_scheduled: bool,
}

impl Default for ConnectionController {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            started: false,
            next_id: 0,
            current: None,
            probing: false,
            reload_scheduled: false,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Id of the connection events are currently accepted from.
    #[must_use]
    pub fn current_connection(&self) -> Option<ConnectionId> {
        self.current.map(|c| c.id)
    }

    /// Begin the page lifecycle: arm the startup grace timer.
    ///
    /// Only the first call has an effect.
    pub fn start(&mut self) -> Vec<Command> {
        if self.started {
            return Vec::new();
        }
        self.started = true;
        vec![Command::Schedule {
            timer: Timer::StartupGrace,
            after: STARTUP_GRACE,
        }]
    }

    /// Apply one event and return the commands it produces.
    pub fn handle(&mut self, event: ClientEvent) -> Vec<Command> {
        let mut commands = Vec::new();
        match event {
            ClientEvent::TimerFired(timer) => self.on_timer(timer, &mut commands),
            ClientEvent::ConnectFailed(id) => {
                tracing::debug!(?id, "Connection could not be constructed");
                self.on_connection_lost(id, &mut commands);
            }
            ClientEvent::Opened(id) => self.on_opened(id, &mut commands),
            ClientEvent::Message(id, text) => self.on_message(id, &text, &mut commands),
            ClientEvent::Errored(id) | ClientEvent::Closed(id) => {
                self.on_connection_lost(id, &mut commands);
            }
            ClientEvent::UnloadBegin => self.on_unload(&mut commands),
        }
        commands
    }

    fn is_current(&self, id: ConnectionId) -> bool {
        self.current.is_some_and(|c| c.id == id)
    }

    fn connect(&mut self, retry: bool, commands: &mut Vec<Command>) {
        if let Some(old) = self.current.take() {
            commands.push(Command::Close(old.id));
        }
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.current = Some(Connection { id, retry });
        commands.push(Command::Connect(id));
    }

    fn on_timer(&mut self, timer: Timer, commands: &mut Vec<Command>) {
        match timer {
            Timer::StartupGrace if self.state == ConnectionState::Disconnected => {
                self.state = ConnectionState::Connecting;
                self.connect(true, commands);
            }
            Timer::RetryProbe if self.state == ConnectionState::Retrying => {
                tracing::debug!("Probing for live reload server");
                self.connect(false, commands);
            }
            Timer::UnloadGrace if self.state == ConnectionState::SuspendedForNavigation => {
                tracing::debug!("Page still loaded after navigation grace, reconnecting");
                self.state = ConnectionState::Connecting;
                self.connect(true, commands);
            }
            Timer::Reload => commands.push(Command::Reload),
            _ => tracing::trace!(?timer, state = ?self.state, "Stale timer ignored"),
        }
    }

    fn on_opened(&mut self, id: ConnectionId, commands: &mut Vec<Command>) {
        if !self.is_current(id) {
            return;
        }
        match self.state {
            ConnectionState::Connecting => {
                tracing::info!("Live reload connected");
                self.state = ConnectionState::Open;
            }
            ConnectionState::Retrying => {
                tracing::info!("Live reload server is back, reloading");
                self.stop_probing(commands);
                self.state = ConnectionState::Open;
                self.reload_scheduled = true;
                commands.push(Command::Reload);
            }
            _ => {}
        }
    }

    fn on_message(&mut self, id: ConnectionId, text: &str, commands: &mut Vec<Command>) {
        if !self.is_current(id) || self.state != ConnectionState::Open {
            return;
        }
        let Some(message) = RefreshMessage::parse(text) else {
            tracing::trace!(text, "Unrecognized message ignored");
            return;
        };
        if self.reload_scheduled {
            return;
        }
        tracing::debug!(%message, "Refresh received");
        self.reload_scheduled = true;
        commands.push(Command::Schedule {
            timer: Timer::Reload,
            after: message.reload_delay(),
        });
    }

    fn on_connection_lost(&mut self, id: ConnectionId, commands: &mut Vec<Command>) {
        let Some(connection) = self.current.filter(|c| c.id == id) else {
            return;
        };
        match self.state {
            ConnectionState::SuspendedForNavigation => {
                tracing::trace!("Connection lost while navigating, not retrying");
            }
            ConnectionState::Connecting | ConnectionState::Open if connection.retry => {
                tracing::debug!("Live reload connection lost, retrying");
                self.state = ConnectionState::Retrying;
                self.probing = true;
                commands.push(Command::Repeat {
                    timer: Timer::RetryProbe,
                    every: RETRY_INTERVAL,
                });
            }
            _ => {}
        }
    }

    fn on_unload(&mut self, commands: &mut Vec<Command>) {
        if self.state == ConnectionState::SuspendedForNavigation {
            return;
        }
        self.state = ConnectionState::SuspendedForNavigation;
        self.stop_probing(commands);
        commands.push(Command::Schedule {
            timer: Timer::UnloadGrace,
            after: UNLOAD_GRACE,
        });
    }

    fn stop_probing(&mut self, commands: &mut Vec<Command>) {
        if self.probing {
            self.probing = false;
            commands.push(Command::Cancel(Timer::RetryProbe));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Controller past the startup grace with its first connection open.
    fn open_controller() -> (ConnectionController, ConnectionId) {
        let mut controller = ConnectionController::new();
        controller.start();
        let commands = controller.handle(ClientEvent::TimerFired(Timer::StartupGrace));
        let Command::Connect(id) = commands[0] else {
            panic!("expected connect, got {commands:?}");
        };
        controller.handle(ClientEvent::Opened(id));
        (controller, id)
    }

    #[test]
    fn test_start_schedules_startup_grace_once() {
        let mut controller = ConnectionController::new();
        assert_eq!(
            controller.start(),
            vec![Command::Schedule {
                timer: Timer::StartupGrace,
                after: STARTUP_GRACE,
            }]
        );
        assert_eq!(controller.start(), vec![]);
        assert_eq!(controller.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_startup_grace_connects() {
        let mut controller = ConnectionController::new();
        controller.start();
        let commands = controller.handle(ClientEvent::TimerFired(Timer::StartupGrace));

        assert_eq!(commands.len(), 1);
        assert!(matches!(commands[0], Command::Connect(_)));
        assert_eq!(controller.state(), ConnectionState::Connecting);

        let (controller, _) = open_controller();
        assert_eq!(controller.state(), ConnectionState::Open);
    }

    #[test]
    fn test_refresh_schedules_reload() {
        let (mut controller, id) = open_controller();
        let commands = controller.handle(ClientEvent::Message(id, "Refresh".to_owned()));
        assert_eq!(
            commands,
            vec![Command::Schedule {
                timer: Timer::Reload,
                after: Duration::from_millis(10),
            }]
        );
        assert_eq!(
            controller.handle(ClientEvent::TimerFired(Timer::Reload)),
            vec![Command::Reload]
        );
    }

    #[test]
    fn test_delay_refresh_waits_longer() {
        let (mut controller, id) = open_controller();
        let commands = controller.handle(ClientEvent::Message(id, "DelayRefresh".to_owned()));
        assert_eq!(
            commands,
            vec![Command::Schedule {
                timer: Timer::Reload,
                after: Duration::from_millis(1000),
            }]
        );
    }

    #[test]
    fn test_unknown_message_ignored() {
        let (mut controller, id) = open_controller();
        assert_eq!(controller.handle(ClientEvent::Message(id, "refresh".to_owned())), vec![]);
        assert_eq!(controller.handle(ClientEvent::Message(id, String::new())), vec![]);
        assert_eq!(controller.state(), ConnectionState::Open);
    }

    #[test]
    fn test_only_first_refresh_honoured() {
        let (mut controller, id) = open_controller();
        controller.handle(ClientEvent::Message(id, "DelayRefresh".to_owned()));
        assert_eq!(controller.handle(ClientEvent::Message(id, "Refresh".to_owned())), vec![]);
    }

    #[test]
    fn test_construction_failure_retries() {
        let mut controller = ConnectionController::new();
        controller.start();
        let commands = controller.handle(ClientEvent::TimerFired(Timer::StartupGrace));
        let Command::Connect(id) = commands[0] else {
            panic!("expected connect");
        };

        let commands = controller.handle(ClientEvent::ConnectFailed(id));
        assert_eq!(controller.state(), ConnectionState::Retrying);
        assert_eq!(
            commands,
            vec![Command::Repeat {
                timer: Timer::RetryProbe,
                every: RETRY_INTERVAL,
            }]
        );
    }

    #[test]
    fn test_reconnect_then_reload_exactly_once() {
        let (mut controller, first) = open_controller();

        // Error followed by close starts a single retry loop
        let commands = controller.handle(ClientEvent::Errored(first));
        assert_eq!(commands.len(), 1);
        assert_eq!(controller.handle(ClientEvent::Closed(first)), vec![]);
        assert_eq!(controller.state(), ConnectionState::Retrying);

        // First probe fails, which must not start another loop
        let commands = controller.handle(ClientEvent::TimerFired(Timer::RetryProbe));
        let Command::Connect(probe) = commands[1] else {
            panic!("expected probe connect, got {commands:?}");
        };
        assert_eq!(commands[0], Command::Close(first));
        assert_eq!(controller.handle(ClientEvent::Closed(probe)), vec![]);
        assert_eq!(controller.state(), ConnectionState::Retrying);

        // Second probe succeeds
        let commands = controller.handle(ClientEvent::TimerFired(Timer::RetryProbe));
        let Command::Connect(probe) = commands[1] else {
            panic!("expected probe connect, got {commands:?}");
        };
        let commands = controller.handle(ClientEvent::Opened(probe));
        assert_eq!(commands, vec![Command::Cancel(Timer::RetryProbe), Command::Reload]);

        // Probing stopped: late timer ticks and stale events do nothing
        assert_eq!(controller.handle(ClientEvent::TimerFired(Timer::RetryProbe)), vec![]);
        assert_eq!(controller.handle(ClientEvent::Opened(first)), vec![]);
        assert_eq!(controller.handle(ClientEvent::Opened(probe)), vec![]);
    }

    #[test]
    fn test_stale_connection_events_ignored() {
        let (mut controller, first) = open_controller();
        controller.handle(ClientEvent::Closed(first));
        let commands = controller.handle(ClientEvent::TimerFired(Timer::RetryProbe));
        let Command::Connect(probe) = commands[1] else {
            panic!("expected probe connect");
        };

        assert_eq!(controller.handle(ClientEvent::Message(first, "Refresh".to_owned())), vec![]);
        assert_eq!(controller.handle(ClientEvent::Errored(first)), vec![]);
        assert_eq!(controller.current_connection(), Some(probe));
    }

    #[test]
    fn test_navigation_suppresses_retry_until_grace() {
        let (mut controller, id) = open_controller();

        let commands = controller.handle(ClientEvent::UnloadBegin);
        assert_eq!(
            commands,
            vec![Command::Schedule {
                timer: Timer::UnloadGrace,
                after: UNLOAD_GRACE,
            }]
        );
        assert_eq!(controller.state(), ConnectionState::SuspendedForNavigation);

        assert_eq!(controller.handle(ClientEvent::Errored(id)), vec![]);
        assert_eq!(controller.handle(ClientEvent::Closed(id)), vec![]);
        assert_eq!(controller.handle(ClientEvent::TimerFired(Timer::RetryProbe)), vec![]);
        assert_eq!(controller.state(), ConnectionState::SuspendedForNavigation);

        let commands = controller.handle(ClientEvent::TimerFired(Timer::UnloadGrace));
        assert_eq!(controller.state(), ConnectionState::Connecting);
        assert_eq!(commands[0], Command::Close(id));
        let Command::Connect(fresh) = commands[1] else {
            panic!("expected connect, got {commands:?}");
        };
        assert_ne!(fresh, id);

        // The fresh connection has retry enabled again
        controller.handle(ClientEvent::Closed(fresh));
        assert_eq!(controller.state(), ConnectionState::Retrying);
    }

    #[test]
    fn test_unload_cancels_probe() {
        let (mut controller, id) = open_controller();
        controller.handle(ClientEvent::Closed(id));

        let commands = controller.handle(ClientEvent::UnloadBegin);
        assert_eq!(commands[0], Command::Cancel(Timer::RetryProbe));
        assert_eq!(controller.handle(ClientEvent::UnloadBegin), vec![]);
    }
}
