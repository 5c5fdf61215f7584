//! Session coordinator
//!
//! Owns the one `Session` and serializes everything that touches it: event
//! delivery, liveness checks and user control commands all go through the
//! same lock. Frontends only read status and register observers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex};

use crate::common::{config::Config, Error, Result};
use crate::control::{ControlClient, ControlCommand, Endpoint};
use crate::events::{ClientGauge, Event, EventKind, EventSink};

use super::marker::{self, Marker};
use super::state::{Session, SessionState, Transition, Trigger};

/// Receives every event and every session change
///
/// Callbacks run while the session lock is held and before the sender gets
/// its acknowledgment, so they should return quickly.
pub trait Observer: Send + Sync {
    fn listen(&self, event: &Event);

    fn state_changed(&self, _transition: Transition) {}

    /// Display path after a push, pop or reset
    fn path_changed(&self, _path: &str) {}

    fn variables_changed(&self, _variables: &BTreeMap<String, String>) {}
}

/// Whether break/continue markers are acted on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Full debugger: markers drive the break handshake
    Control,
    /// Watch a run without ever pausing it
    ObserveOnly,
}

/// Read-only snapshot for frontends
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub path: String,
    pub depth: usize,
    pub endpoint: Endpoint,
}

impl SessionStatus {
    fn of(session: &Session) -> Self {
        Self {
            state: session.state(),
            path: session.stack().path(),
            depth: session.stack().depth(),
            endpoint: session.endpoint().clone(),
        }
    }
}

pub struct Coordinator {
    session: Mutex<Session>,
    observers: Vec<Arc<dyn Observer>>,
    control: ControlClient,
    mode: Mode,
    /// Host for port-only break markers
    default_host: String,
    shutdown_timeout: Duration,
    status_tx: watch::Sender<SessionStatus>,
}

impl Coordinator {
    pub fn new(config: &Config, mode: Mode) -> Self {
        let session = Session::new(config.default_endpoint());
        let (status_tx, _) = watch::channel(SessionStatus::of(&session));

        Self {
            session: Mutex::new(session),
            observers: Vec::new(),
            control: ControlClient::new(config.control_timeout()),
            mode,
            default_host: config.control.host.clone(),
            shutdown_timeout: config.shutdown_timeout(),
            status_tx,
        }
    }

    /// Register an observer; observers are fixed once the coordinator is shared
    pub fn add_observer(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.add_observer(observer);
        self
    }

    /// Status updates without taking the session lock
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    pub async fn status(&self) -> SessionStatus {
        SessionStatus::of(&*self.session.lock().await)
    }

    /// Last variable snapshot, ordered case-insensitively by name
    pub async fn variables(&self) -> Vec<(String, String)> {
        sorted_variables(self.session.lock().await.variables())
    }

    // === Transitions ===

    fn apply(&self, session: &mut Session, trigger: Trigger) -> Option<Transition> {
        let transition = session.transition(trigger)?;
        tracing::info!(from = %transition.from, to = %transition.to, "Session state changed");

        for observer in &self.observers {
            observer.state_changed(transition);
        }
        if transition.from == SessionState::Idle && transition.to == SessionState::Running {
            self.notify_path(session);
            self.notify_variables(session);
        }
        self.publish(session);
        Some(transition)
    }

    fn publish(&self, session: &Session) {
        self.status_tx.send_replace(SessionStatus::of(session));
    }

    fn notify_path(&self, session: &Session) {
        let path = session.stack().path();
        tracing::debug!(%path, depth = session.stack().depth(), "Call stack changed");
        for observer in &self.observers {
            observer.path_changed(&path);
        }
        self.publish(session);
    }

    fn notify_variables(&self, session: &Session) {
        for observer in &self.observers {
            observer.variables_changed(session.variables());
        }
    }

    async fn handle(&self, session: &mut Session, event: &Event) -> Result<()> {
        let kind = match event.kind() {
            Ok(kind) => kind,
            Err(e) => {
                tracing::warn!("Ignoring malformed event: {}", e);
                return Ok(());
            }
        };

        match kind {
            EventKind::Pid | EventKind::Ready => {
                self.apply(session, Trigger::RunStarted);
            }
            EventKind::Close => {
                self.apply(session, Trigger::Closed);
            }
            EventKind::Start { kind, name } => {
                session.stack.push(kind, name);
                self.notify_path(session);
            }
            EventKind::End { .. } => {
                if let Err(e) = session.stack.pop(&event.command) {
                    tracing::error!(id = event.id, "Sender broke start/end nesting; aborting session");
                    self.apply(session, Trigger::Aborted);
                    return Err(e);
                }
                self.notify_path(session);
            }
            EventKind::Log(message) => {
                if self.mode == Mode::ObserveOnly {
                    return Ok(());
                }
                match marker::parse(&message, &self.default_host) {
                    Some(Marker::Break(endpoint)) => {
                        tracing::debug!(%endpoint, "Break marker received");
                        if self.apply(session, Trigger::BreakHit(endpoint)).is_some() {
                            self.enter_break(session).await;
                        }
                    }
                    Some(Marker::Continue) => {
                        self.apply(session, Trigger::Continued);
                    }
                    None => {}
                }
            }
            EventKind::Other => {}
        }
        Ok(())
    }

    /// Break-entry side effects: acknowledge the handshake, then snapshot variables
    async fn enter_break(&self, session: &mut Session) {
        let endpoint = session.endpoint().clone();

        if let Err(e) = self.control.ready(&endpoint).await {
            tracing::warn!(%endpoint, "Breakpoint handshake failed: {}", e);
            return;
        }

        let variables = match self.control.get_variables(&endpoint).await {
            Ok(variables) => variables,
            Err(e) => {
                tracing::warn!(%endpoint, "Variable refresh failed: {}", e);
                BTreeMap::new()
            }
        };
        session.set_variables(variables);
        self.notify_variables(session);
    }

    /// Force the session idle if no sender is connected
    ///
    /// The client count is sampled under the session lock so a transition
    /// that is in flight finishes before the decision is made.
    pub async fn check_liveness(&self, clients: &ClientGauge) -> Option<Transition> {
        let mut session = self.session.lock().await;
        if clients.has_clients() {
            return None;
        }
        self.apply(&mut session, Trigger::ClientsGone)
    }

    // === Control commands ===

    /// Endpoint to use for an action that is only valid while paused
    async fn break_endpoint(&self, action: &str) -> Result<Endpoint> {
        self.paused_at(action).await.map(|(endpoint, _)| endpoint)
    }

    /// Endpoint and pause id for an action that is only valid while paused
    async fn paused_at(&self, action: &str) -> Result<(Endpoint, u64)> {
        let session = self.session.lock().await;
        match session.pause() {
            Some(pause) => Ok((session.endpoint().clone(), pause)),
            None => Err(Error::invalid_state(action, session.state())),
        }
    }

    pub async fn resume(&self) -> Result<()> {
        let endpoint = self.break_endpoint("resume").await?;
        self.control.resume(&endpoint).await
    }

    pub async fn stop(&self) -> Result<()> {
        let endpoint = self.break_endpoint("stop").await?;
        self.control.stop(&endpoint).await
    }

    pub async fn fail_test(&self) -> Result<()> {
        let endpoint = self.break_endpoint("fail the test").await?;
        self.control.fail_test(&endpoint).await
    }

    /// Ping the current endpoint, whatever the state
    pub async fn ping(&self) -> Result<()> {
        let endpoint = self.session.lock().await.endpoint().clone();
        self.control.ping(&endpoint).await
    }

    /// Fetch a fresh variable snapshot
    ///
    /// The reply is kept only if the session is still in the pause it was
    /// requested from; otherwise the current snapshot is returned unchanged.
    pub async fn refresh_variables(&self) -> Result<Vec<(String, String)>> {
        let (endpoint, pause) = self.paused_at("get variables").await?;
        let variables = self.control.get_variables(&endpoint).await?;

        let mut session = self.session.lock().await;
        if session.pause() == Some(pause) {
            session.set_variables(variables);
            self.notify_variables(&session);
        } else {
            tracing::debug!(%endpoint, state = %session.state(), "Dropping variables from a finished pause");
        }
        Ok(sorted_variables(session.variables()))
    }

    /// Run a keyword in the paused test, then refresh variables
    pub async fn run_keyword(&self, name: &str, args: &[String]) -> Result<Value> {
        let endpoint = self.break_endpoint("run a keyword").await?;
        let result = self.control.run_keyword(&endpoint, name, args).await?;

        if let Err(e) = self.refresh_variables().await {
            tracing::warn!("Variable refresh after run_keyword failed: {}", e);
        }
        Ok(result)
    }

    /// Best-effort release of a paused remote before exit
    ///
    /// Bounded by the shutdown timeout at every step; errors are logged and
    /// discarded. Observe-only sessions skip it.
    pub async fn shutdown(&self) {
        // An observe-only session never owns a paused remote
        if self.mode == Mode::ObserveOnly {
            return;
        }
        let snapshot = tokio::time::timeout(self.shutdown_timeout, self.session.lock()).await;
        let (state, endpoint) = match snapshot {
            Ok(session) => (session.state(), session.endpoint().clone()),
            Err(_) => {
                tracing::debug!("Session busy at shutdown; skipping resume");
                return;
            }
        };

        if state == SessionState::Idle {
            return;
        }

        match self
            .control
            .call_with_timeout(&endpoint, &ControlCommand::Resume, self.shutdown_timeout)
            .await
        {
            Ok(_) => tracing::debug!(%endpoint, "Sent resume on shutdown"),
            Err(e) => tracing::debug!(%endpoint, "Resume on shutdown failed: {}", e),
        }
    }
}

#[async_trait]
impl EventSink for Coordinator {
    async fn deliver(&self, event: Event) -> Result<()> {
        let mut session = self.session.lock().await;
        for observer in &self.observers {
            observer.listen(&event);
        }
        self.handle(&mut session, &event).await
    }
}

/// Variables ordered by lowercase name
pub fn sorted_variables(variables: &BTreeMap<String, String>) -> Vec<(String, String)> {
    let mut sorted: Vec<(String, String)> = variables
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    sorted.sort_by_key(|(k, _)| k.to_lowercase());
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventRecord;
    use crate::remote::{ControlHandler, ControlServer};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Recorder {
        ids: StdMutex<Vec<u64>>,
        paths: StdMutex<Vec<String>>,
        transitions: StdMutex<Vec<Transition>>,
    }

    impl Observer for Recorder {
        fn listen(&self, event: &Event) {
            self.ids.lock().unwrap().push(event.id);
        }
        fn state_changed(&self, transition: Transition) {
            self.transitions.lock().unwrap().push(transition);
        }
        fn path_changed(&self, path: &str) {
            self.paths.lock().unwrap().push(path.to_string());
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.control.timeout_secs = 1;
        config.control.shutdown_timeout_secs = 1;
        config
    }

    fn coordinator(mode: Mode) -> (Coordinator, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let coordinator = Coordinator::new(&config(), mode).with_observer(recorder.clone());
        (coordinator, recorder)
    }

    async fn feed(coordinator: &Coordinator, id: u64, command: &str, args: Vec<Value>) -> Result<()> {
        let record = EventRecord {
            command: command.to_string(),
            args,
        };
        coordinator.deliver(Event::new(id, record)).await
    }

    fn debug(message: &str) -> Value {
        json!({"level": "DEBUG", "message": message})
    }

    /// A port nobody listens on
    fn dead_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    /// Remote whose second variable fetch blocks until released
    #[derive(Default)]
    struct HeldRemote {
        fetches: AtomicUsize,
        received: StdMutex<Vec<ControlCommand>>,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ControlHandler for HeldRemote {
        async fn handle(&self, command: ControlCommand) -> std::result::Result<Value, String> {
            self.received.lock().unwrap().push(command.clone());
            if command != ControlCommand::GetVariables {
                return Ok(Value::Null);
            }
            if self.fetches.fetch_add(1, Ordering::SeqCst) == 1 {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(json!({"${old_run}": "stale"}))
        }
    }

    async fn serve(handler: Arc<dyn ControlHandler>) -> (u16, watch::Sender<bool>) {
        let server = ControlServer::bind("127.0.0.1:0", handler).await.unwrap();
        let port = server.local_addr().unwrap().port();
        let (tx, rx) = watch::channel(false);
        tokio::spawn(server.run(rx));
        (port, tx)
    }

    #[tokio::test]
    async fn test_observers_see_every_event_in_order() {
        let (c, recorder) = coordinator(Mode::Control);
        for (id, command) in ["pid", "output_file", "log_message", "close"].iter().enumerate() {
            feed(&c, id as u64 + 1, command, vec![json!("x")]).await.unwrap();
        }
        assert_eq!(*recorder.ids.lock().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(c.status().await.state, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_path_progression() {
        let (c, recorder) = coordinator(Mode::ObserveOnly);
        feed(&c, 1, "pid", vec![json!(4242)]).await.unwrap();
        feed(&c, 2, "start_suite", vec![json!("S1"), json!({})]).await.unwrap();
        feed(&c, 3, "start_test", vec![json!("T1"), json!({})]).await.unwrap();
        feed(&c, 4, "start_keyword", vec![json!("K1"), json!({})]).await.unwrap();
        assert_eq!(c.status().await.path, "S1.T1.K1");
        feed(&c, 5, "end_keyword", vec![]).await.unwrap();
        feed(&c, 6, "end_test", vec![]).await.unwrap();
        feed(&c, 7, "end_suite", vec![]).await.unwrap();

        assert_eq!(
            *recorder.paths.lock().unwrap(),
            vec!["", "S1", "S1.T1", "S1.T1.K1", "S1.T1", "S1", ""]
        );
    }

    #[tokio::test]
    async fn test_observe_only_ignores_markers() {
        let (c, _) = coordinator(Mode::ObserveOnly);
        feed(&c, 1, "pid", vec![]).await.unwrap();
        feed(&c, 2, "log_message", vec![json!({"level": "DEBUG", "message": ":break:localhost:9001"})])
            .await
            .unwrap();
        let status = c.status().await;
        assert_eq!(status.state, SessionState::Running);
        assert_eq!(status.endpoint, Endpoint::new("localhost", 8911));
    }

    #[tokio::test]
    async fn test_unreachable_handshake_still_breaks() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (c, _) = coordinator(Mode::Control);
        feed(&c, 1, "pid", vec![]).await.unwrap();
        let marker = format!(" :break:127.0.0.1:{port} ");
        feed(&c, 2, "log_message", vec![json!({"level": "DEBUG", "message": marker})])
            .await
            .unwrap();

        let status = c.status().await;
        assert_eq!(status.state, SessionState::Break);
        assert_eq!(status.endpoint, Endpoint::new("127.0.0.1", port));

        // The user gets a recoverable error and the session stays paused
        let err = c.resume().await.unwrap_err();
        assert!(err.is_control_failure());
        assert_eq!(c.status().await.state, SessionState::Break);

        feed(&c, 3, "log_message", vec![json!({"level": "DEBUG", "message": ":continue:"})])
            .await
            .unwrap();
        assert_eq!(c.status().await.state, SessionState::Running);
    }

    #[tokio::test]
    async fn test_commands_require_break() {
        let (c, _) = coordinator(Mode::Control);
        let err = c.resume().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { ref state, .. } if state == "idle"));

        feed(&c, 1, "pid", vec![]).await.unwrap();
        assert!(matches!(
            c.run_keyword("Log", &[]).await.unwrap_err(),
            Error::InvalidState { .. }
        ));
    }

    #[tokio::test]
    async fn test_underflow_aborts_session() {
        let (c, recorder) = coordinator(Mode::Control);
        feed(&c, 1, "pid", vec![]).await.unwrap();
        let err = feed(&c, 2, "end_keyword", vec![]).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(c.status().await.state, SessionState::Idle);
        assert_eq!(recorder.transitions.lock().unwrap().last().unwrap().to, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_malformed_start_is_ignored() {
        let (c, _) = coordinator(Mode::Control);
        feed(&c, 1, "start_suite", vec![json!(17)]).await.unwrap();
        assert_eq!(c.status().await.depth, 0);
    }

    #[tokio::test]
    async fn test_liveness_transition_happens_once() {
        let (c, recorder) = coordinator(Mode::Control);
        feed(&c, 1, "pid", vec![]).await.unwrap();

        let gauge = ClientGauge::default();
        assert!(c.check_liveness(&gauge).await.is_some());
        assert!(c.check_liveness(&gauge).await.is_none());
        assert!(c.check_liveness(&gauge).await.is_none());

        let to_idle = recorder
            .transitions
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.to == SessionState::Idle)
            .count();
        assert_eq!(to_idle, 1);
    }

    #[tokio::test]
    async fn test_status_channel_follows_session() {
        let (c, _) = coordinator(Mode::Control);
        let rx = c.subscribe();
        feed(&c, 1, "pid", vec![]).await.unwrap();
        feed(&c, 2, "start_suite", vec![json!("Suite")]).await.unwrap();
        let status = rx.borrow().clone();
        assert_eq!(status.state, SessionState::Running);
        assert_eq!(status.path, "Suite");
    }

    #[tokio::test]
    async fn test_shutdown_when_idle_is_noop() {
        let (c, _) = coordinator(Mode::Control);
        c.shutdown().await;
        assert_eq!(c.status().await.state, SessionState::Idle);
    }

    #[test]
    fn test_sorted_variables_case_insensitive() {
        let vars = BTreeMap::from([
            ("${b}".to_string(), "2".to_string()),
            ("${A}".to_string(), "1".to_string()),
            ("${c}".to_string(), "3".to_string()),
        ]);
        let names: Vec<String> = sorted_variables(&vars).into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["${A}", "${b}", "${c}"]);
    }

    #[tokio::test]
    async fn test_ready_starts_a_run() {
        let (c, recorder) = coordinator(Mode::Control);
        feed(&c, 1, "ready", vec![]).await.unwrap();

        assert_eq!(c.status().await.state, SessionState::Running);
        assert_eq!(
            *recorder.transitions.lock().unwrap(),
            vec![Transition {
                from: SessionState::Idle,
                to: SessionState::Running
            }]
        );
    }

    #[tokio::test]
    async fn test_paused_session_ignores_unrelated_events() {
        let port = dead_port();
        let (c, recorder) = coordinator(Mode::Control);
        feed(&c, 1, "pid", vec![]).await.unwrap();
        feed(&c, 2, "start_suite", vec![json!("S1")]).await.unwrap();
        feed(&c, 3, "log_message", vec![debug(&format!(":break:127.0.0.1:{port}"))])
            .await
            .unwrap();
        assert_eq!(c.status().await.state, SessionState::Break);
        let transitions = recorder.transitions.lock().unwrap().len();

        feed(&c, 4, "log_message", vec![debug("Arguments: [ 'x' ]")]).await.unwrap();
        feed(&c, 5, "log_message", vec![json!({"level": "INFO", "message": ":continue:"})])
            .await
            .unwrap();
        feed(&c, 6, "log_message", vec![debug(":break:localhost:9001")]).await.unwrap();
        feed(&c, 7, "pid", vec![json!(99)]).await.unwrap();

        let status = c.status().await;
        assert_eq!(status.state, SessionState::Break);
        assert_eq!(status.endpoint, Endpoint::new("127.0.0.1", port));
        assert_eq!(status.path, "S1");
        assert_eq!(recorder.transitions.lock().unwrap().len(), transitions);
    }

    #[tokio::test]
    async fn test_refresh_from_finished_pause_is_dropped() {
        let remote = Arc::new(HeldRemote::default());
        let (port, _server) = serve(remote.clone()).await;
        let (c, _) = coordinator(Mode::Control);
        let c = Arc::new(c);

        feed(&c, 1, "pid", vec![]).await.unwrap();
        feed(&c, 2, "log_message", vec![debug(&format!(":break:127.0.0.1:{port}"))])
            .await
            .unwrap();
        assert_eq!(c.variables().await.len(), 1);

        let refresh = tokio::spawn({
            let c = Arc::clone(&c);
            async move { c.refresh_variables().await }
        });
        remote.entered.notified().await;

        // The run moves on while the fetch is in flight
        feed(&c, 3, "log_message", vec![debug(":continue:")]).await.unwrap();
        feed(&c, 4, "close", vec![]).await.unwrap();
        feed(&c, 5, "pid", vec![]).await.unwrap();
        assert!(c.variables().await.is_empty());

        remote.release.notify_one();
        let listed = refresh.await.unwrap().unwrap();
        assert!(listed.is_empty());
        assert!(c.variables().await.is_empty());
        assert_eq!(c.status().await.state, SessionState::Running);
    }

    #[tokio::test]
    async fn test_observe_only_shutdown_never_contacts_remote() {
        let remote = Arc::new(HeldRemote::default());
        let (port, _server) = serve(remote.clone()).await;
        let mut config = config();
        config.control.host = "127.0.0.1".to_string();
        config.control.port = port;

        let c = Coordinator::new(&config, Mode::ObserveOnly);
        feed(&c, 1, "pid", vec![]).await.unwrap();
        c.shutdown().await;
        assert!(remote.received.lock().unwrap().is_empty());

        // The same session in control mode does release the remote
        let c = Coordinator::new(&config, Mode::Control);
        feed(&c, 1, "pid", vec![]).await.unwrap();
        c.shutdown().await;
        assert_eq!(*remote.received.lock().unwrap(), vec![ControlCommand::Resume]);
    }
}
