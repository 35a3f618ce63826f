use std::{
  collections::HashMap,
  sync::Arc,
  time::{
    Duration,
    Instant,
  },
};

use parking_lot::{
  Condvar,
  Mutex,
};
use serde_json::Value;
use tracing::debug;

use crate::{
  capabilities::ServerCapabilitiesSnapshot,
  jsonrpc::RequestDispatch,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  Connecting,
  Ready,
  Failed,
}

/// Borrowed view of one live (or establishing) server session. The
/// registry owns the session; a handle is a snapshot taken at listing
/// time plus the dispatch channel to the session's transport.
#[derive(Clone)]
pub struct ConnectionHandle {
  id:           String,
  state:        ConnectionState,
  capabilities: Option<ServerCapabilitiesSnapshot>,
  dispatch:     Arc<dyn RequestDispatch>,
}

impl ConnectionHandle {
  pub fn new(
    id: impl Into<String>,
    state: ConnectionState,
    capabilities: Option<ServerCapabilitiesSnapshot>,
    dispatch: Arc<dyn RequestDispatch>,
  ) -> Self {
    Self {
      id: id.into(),
      state,
      capabilities,
      dispatch,
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn state(&self) -> ConnectionState {
    self.state
  }

  pub fn is_live(&self) -> bool {
    self.state != ConnectionState::Failed
  }

  pub fn capabilities(&self) -> Option<&ServerCapabilitiesSnapshot> {
    self.capabilities.as_ref()
  }

  pub fn dispatch(&self) -> &Arc<dyn RequestDispatch> {
    &self.dispatch
  }
}

impl std::fmt::Debug for ConnectionHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ConnectionHandle")
      .field("id", &self.id)
      .field("state", &self.state)
      .field("capabilities_known", &self.capabilities.is_some())
      .finish()
  }
}

/// What the selector and coordinator need from whoever owns the server
/// sessions.
pub trait ConnectionRegistry: Send + Sync {
  /// Sessions currently associated with `uri`, connecting or ready.
  fn list_connections(&self, uri: &str) -> Vec<ConnectionHandle>;

  /// The session with a specific definition id, if it serves `uri`.
  fn get_connection(&self, uri: &str, definition_id: &str) -> Option<ConnectionHandle>;

  /// Blocks up to `timeout` until the session is ready and its
  /// capabilities satisfy `predicate`. Timing out means "no match yet",
  /// not an error; the caller re-evaluates when the session comes up.
  fn await_ready(
    &self,
    connection: &ConnectionHandle,
    predicate: &dyn Fn(Option<&ServerCapabilitiesSnapshot>) -> bool,
    timeout: Duration,
  ) -> bool;
}

struct Session {
  root:         String,
  state:        ConnectionState,
  capabilities: Option<ServerCapabilitiesSnapshot>,
  dispatch:     Arc<dyn RequestDispatch>,
}

impl Session {
  fn serves(&self, uri: &str) -> bool {
    uri.starts_with(&self.root)
  }
}

/// Concrete registry keyed by server definition id. Each session serves
/// the URIs under its root prefix. Readiness transitions wake every
/// `await_ready` waiter.
#[derive(Default)]
pub struct SessionRegistry {
  sessions: Mutex<HashMap<String, Session>>,
  ready:    Condvar,
}

impl SessionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(
    &self,
    definition_id: impl Into<String>,
    root: impl Into<String>,
    dispatch: Arc<dyn RequestDispatch>,
  ) {
    let definition_id = definition_id.into();
    debug!(id = %definition_id, "session connecting");
    self.sessions.lock().insert(definition_id, Session {
      root: root.into(),
      state: ConnectionState::Connecting,
      capabilities: None,
      dispatch,
    });
  }

  pub fn mark_ready(&self, definition_id: &str, raw_capabilities: Value) {
    let mut sessions = self.sessions.lock();
    if let Some(session) = sessions.get_mut(definition_id) {
      session.state = ConnectionState::Ready;
      session.capabilities = Some(ServerCapabilitiesSnapshot::from_raw(raw_capabilities));
      debug!(id = %definition_id, "session ready");
    }
    drop(sessions);
    self.ready.notify_all();
  }

  pub fn mark_failed(&self, definition_id: &str) {
    let mut sessions = self.sessions.lock();
    if let Some(session) = sessions.get_mut(definition_id) {
      session.state = ConnectionState::Failed;
      session.capabilities = None;
      debug!(id = %definition_id, "session failed");
    }
    drop(sessions);
    self.ready.notify_all();
  }

  pub fn remove(&self, definition_id: &str) {
    self.sessions.lock().remove(definition_id);
    self.ready.notify_all();
  }

  fn handle(definition_id: &str, session: &Session) -> ConnectionHandle {
    ConnectionHandle::new(
      definition_id,
      session.state,
      session.capabilities.clone(),
      Arc::clone(&session.dispatch),
    )
  }
}

impl ConnectionRegistry for SessionRegistry {
  fn list_connections(&self, uri: &str) -> Vec<ConnectionHandle> {
    self
      .sessions
      .lock()
      .iter()
      .filter(|(_, session)| session.serves(uri) && session.state != ConnectionState::Failed)
      .map(|(id, session)| Self::handle(id, session))
      .collect()
  }

  fn get_connection(&self, uri: &str, definition_id: &str) -> Option<ConnectionHandle> {
    self
      .sessions
      .lock()
      .get(definition_id)
      .filter(|session| session.serves(uri))
      .map(|session| Self::handle(definition_id, session))
  }

  fn await_ready(
    &self,
    connection: &ConnectionHandle,
    predicate: &dyn Fn(Option<&ServerCapabilitiesSnapshot>) -> bool,
    timeout: Duration,
  ) -> bool {
    let deadline = Instant::now() + timeout;
    let mut sessions = self.sessions.lock();
    loop {
      match sessions.get(connection.id()) {
        Some(session) if session.state == ConnectionState::Ready => {
          return predicate(session.capabilities.as_ref());
        },
        Some(session) if session.state == ConnectionState::Failed => return false,
        Some(_) => {},
        None => return false,
      }

      let now = Instant::now();
      if now >= deadline {
        return false;
      }
      if self
        .ready
        .wait_for(&mut sessions, deadline - now)
        .timed_out()
      {
        return false;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::mpsc::{
      Receiver,
      channel,
    },
    thread,
  };

  use serde_json::json;

  use super::*;
  use crate::jsonrpc::{
    Request,
    Response,
  };

  struct NoopDispatch;

  impl RequestDispatch for NoopDispatch {
    fn send(&self, _request: Request) -> Receiver<Response> {
      let (_tx, rx) = channel();
      rx
    }
  }

  fn dispatch() -> Arc<dyn RequestDispatch> {
    Arc::new(NoopDispatch)
  }

  #[test]
  fn lists_sessions_serving_the_uri() {
    let registry = SessionRegistry::new();
    registry.insert("rust", "file:///workspace/", dispatch());
    registry.insert("python", "file:///elsewhere/", dispatch());
    registry.insert("broken", "file:///workspace/", dispatch());
    registry.mark_failed("broken");

    let listed = registry.list_connections("file:///workspace/src/main.rs");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id(), "rust");
    assert_eq!(listed[0].state(), ConnectionState::Connecting);
    assert!(listed[0].capabilities().is_none());
  }

  #[test]
  fn await_ready_returns_once_capabilities_arrive() {
    let registry = Arc::new(SessionRegistry::new());
    registry.insert("rust", "file:///workspace/", dispatch());
    let connection = registry
      .get_connection("file:///workspace/a.rs", "rust")
      .expect("connection exists");

    let background = Arc::clone(&registry);
    let worker = thread::spawn(move || {
      thread::sleep(Duration::from_millis(20));
      background.mark_ready("rust", json!({ "renameProvider": true }));
    });

    let ready = registry.await_ready(
      &connection,
      &|capabilities| capabilities.is_some(),
      Duration::from_millis(500),
    );
    worker.join().expect("worker");
    assert!(ready);
  }

  #[test]
  fn await_ready_times_out_as_no_match() {
    let registry = SessionRegistry::new();
    registry.insert("rust", "file:///workspace/", dispatch());
    let connection = registry
      .get_connection("file:///workspace/a.rs", "rust")
      .expect("connection exists");

    let ready = registry.await_ready(&connection, &|_| true, Duration::from_millis(20));
    assert!(!ready);
  }
}
