use std::{
  collections::HashMap,
  sync::{
    Arc,
    atomic::{
      AtomicU64,
      Ordering,
    },
    mpsc::{
      RecvTimeoutError,
      channel,
    },
  },
  thread,
  time::{
    Duration,
    Instant,
  },
};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{
  debug,
  warn,
};

use crate::{
  capabilities::OperationKind,
  jsonrpc::Request,
  protocol::{
    self,
    CodeActionOrCommand,
    LspCodeAction,
    LspCommand,
  },
  registry::{
    ConnectionHandle,
    ConnectionRegistry,
  },
  selector,
};

/// Identity of one coordinated query: the resource plus the operation
/// asked of it. Marker storage is keyed by this.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
  pub uri:  String,
  pub kind: OperationKind,
}

impl QueryKey {
  pub fn new(uri: impl Into<String>, kind: OperationKind) -> Self {
    Self {
      uri: uri.into(),
      kind,
    }
  }
}

/// The value cached against a marker. Absent (no entry), computing, or
/// resolved. `Computing -> Resolved` is the only forward transition; a
/// resolved value is only ever replaced by another resolved value.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingActions {
  Computing,
  Resolved(Vec<CodeActionOrCommand>),
}

/// Stand-in for the marker/annotation attribute storage. The store owns
/// its synchronization; the coordinator never assumes cross-thread
/// writes are safe beyond this contract.
pub trait AttributeStore: Send + Sync {
  fn get(&self, key: &QueryKey) -> Option<PendingActions>;
  fn set(&self, key: &QueryKey, value: PendingActions);
  fn clear(&self, key: &QueryKey);
}

#[derive(Default)]
pub struct MemoryAttributeStore {
  entries: Mutex<HashMap<QueryKey, PendingActions>>,
}

impl MemoryAttributeStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl AttributeStore for MemoryAttributeStore {
  fn get(&self, key: &QueryKey) -> Option<PendingActions> {
    self.entries.lock().get(key).cloned()
  }

  fn set(&self, key: &QueryKey, value: PendingActions) {
    self.entries.lock().insert(key.clone(), value);
  }

  fn clear(&self, key: &QueryKey) {
    self.entries.lock().remove(key);
  }
}

/// Registered by the UI layer to be told when a key transitions to a
/// resolved value (including later overwrites by slower connections),
/// so it can re-poll and re-show whatever is open. This replaces poking
/// at widget internals: the coordinator tells, the UI decides.
pub trait RefreshObserver: Send + Sync {
  fn results_ready(&self, key: &QueryKey);
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
  result_wait:     Duration,
  enablement_wait: Duration,
}

impl Default for CoordinatorConfig {
  fn default() -> Self {
    Self {
      result_wait:     Duration::from_millis(300),
      enablement_wait: Duration::from_millis(50),
    }
  }
}

impl CoordinatorConfig {
  pub fn with_result_wait(mut self, wait: Duration) -> Self {
    self.result_wait = wait;
    self
  }

  pub fn with_enablement_wait(mut self, wait: Duration) -> Self {
    self.enablement_wait = wait;
    self
  }

  pub fn result_wait(&self) -> Duration {
    self.result_wait
  }

  pub fn enablement_wait(&self) -> Duration {
    self.enablement_wait
  }
}

/// What a query call tells its immediate caller.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
  /// Requests are outstanding; render a placeholder and re-poll on the
  /// refresh notification.
  Computing,
  Resolved(Vec<CodeActionOrCommand>),
}

/// What the quick-fix UI materializes per entry.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerResolution {
  Computing,
  Command(LspCommand),
  CodeAction(LspCodeAction),
}

impl MarkerResolution {
  pub fn label(&self) -> &str {
    match self {
      Self::Computing => "Computing quick fixes...",
      Self::Command(command) => &command.title,
      Self::CodeAction(action) => &action.title,
    }
  }
}

enum ConnectionOutcome {
  Resolved(Vec<CodeActionOrCommand>),
  Failed,
}

/// Fans one request out per capable connection and caches the tri-state
/// result against the attribute store.
pub struct RequestCoordinator {
  registry:        Arc<dyn ConnectionRegistry>,
  store:           Arc<dyn AttributeStore>,
  observers:       Arc<Mutex<Vec<Arc<dyn RefreshObserver>>>>,
  config:          CoordinatorConfig,
  next_request_id: AtomicU64,
}

impl RequestCoordinator {
  pub fn new(
    registry: Arc<dyn ConnectionRegistry>,
    store: Arc<dyn AttributeStore>,
    config: CoordinatorConfig,
  ) -> Self {
    Self {
      registry,
      store,
      observers: Arc::new(Mutex::new(Vec::new())),
      config,
      next_request_id: AtomicU64::new(1),
    }
  }

  pub fn config(&self) -> &CoordinatorConfig {
    &self.config
  }

  pub fn add_observer(&self, observer: Arc<dyn RefreshObserver>) {
    self.observers.lock().push(observer);
  }

  /// Coordinated lookup for `uri` + `kind`.
  ///
  /// A cached resolved value returns immediately; a computing entry
  /// returns the placeholder without a second dispatch. Otherwise the
  /// store is marked computing before anything is dispatched, one
  /// request per selected connection goes onto the worker pool, and
  /// the call waits a short bound for them so near-instant answers
  /// never flash a placeholder. Timing out is not an error: the caller
  /// sees `Computing` and re-polls when the refresh observer fires.
  pub fn query(
    &self,
    uri: &str,
    kind: OperationKind,
    preferred: Option<&str>,
    request_builder: &dyn Fn(&ConnectionHandle) -> Value,
  ) -> QueryOutcome {
    let key = QueryKey::new(uri, kind);
    match self.store.get(&key) {
      Some(PendingActions::Resolved(list)) => return QueryOutcome::Resolved(list),
      Some(PendingActions::Computing) => return QueryOutcome::Computing,
      None => {},
    }

    let connections = selector::select(self.registry.as_ref(), uri, kind, preferred);
    if connections.is_empty() {
      // Nothing to ask: resolve empty without ever writing the
      // computing sentinel.
      return QueryOutcome::Resolved(Vec::new());
    }

    // The sentinel must be observable before any dispatched request
    // can complete.
    self.store.set(&key, PendingActions::Computing);

    let (done_tx, done_rx) = channel();
    for connection in connections {
      let params = request_builder(&connection);
      let request = Request::new(
        self.next_request_id.fetch_add(1, Ordering::Relaxed),
        kind.method(),
        Some(params),
      );
      debug!(id = %connection.id(), method = request.method, "dispatching request");
      let response_rx = connection.dispatch().send(request);

      let store = Arc::clone(&self.store);
      let observers = Arc::clone(&self.observers);
      let done_tx = done_tx.clone();
      let key = key.clone();
      let connection_id = connection.id().to_string();
      thread::Builder::new()
        .name("seam-lsp-query".into())
        .spawn(move || {
          let outcome = match response_rx.recv() {
            Ok(response) => {
              if let Some(error) = &response.error {
                debug!(
                  id = %connection_id,
                  code = error.code,
                  message = %error.message,
                  "request failed"
                );
                ConnectionOutcome::Failed
              } else {
                match protocol::parse_code_actions_response(response.result.as_ref()) {
                  Ok(list) => ConnectionOutcome::Resolved(list),
                  Err(err) => {
                    warn!(id = %connection_id, error = %err, "malformed response");
                    ConnectionOutcome::Failed
                  },
                }
              }
            },
            Err(_) => {
              debug!(id = %connection_id, "connection dropped before responding");
              ConnectionOutcome::Failed
            },
          };

          match outcome {
            ConnectionOutcome::Resolved(list) => {
              // Last completed connection wins the stored value.
              store.set(&key, PendingActions::Resolved(list));
              notify_observers(&observers, &key);
            },
            ConnectionOutcome::Failed => {
              // A failure resolves to empty but never clobbers a real
              // result another connection already produced.
              if matches!(store.get(&key), Some(PendingActions::Computing)) {
                store.set(&key, PendingActions::Resolved(Vec::new()));
                notify_observers(&observers, &key);
              }
            },
          }
          let _ = done_tx.send(());
        })
        .expect("failed to spawn query worker thread");
    }
    drop(done_tx);

    // Short bounded wait so fast servers resolve before the caller
    // renders anything.
    let deadline = Instant::now() + self.config.result_wait;
    loop {
      let remaining = deadline.saturating_duration_since(Instant::now());
      match done_rx.recv_timeout(remaining) {
        Ok(()) => continue,
        Err(RecvTimeoutError::Disconnected) => break,
        Err(RecvTimeoutError::Timeout) => {
          debug!(uri, ?kind, "query still computing after bounded wait");
          break;
        },
      }
    }

    match self.store.get(&key) {
      Some(PendingActions::Resolved(list)) => QueryOutcome::Resolved(list),
      _ => QueryOutcome::Computing,
    }
  }

  /// Whether the quick-fix UI should offer anything for this marker:
  /// yes while computing, yes for a non-empty resolved list.
  pub fn has_resolutions(
    &self,
    uri: &str,
    kind: OperationKind,
    preferred: Option<&str>,
    request_builder: &dyn Fn(&ConnectionHandle) -> Value,
  ) -> bool {
    match self.query(uri, kind, preferred, request_builder) {
      QueryOutcome::Computing => true,
      QueryOutcome::Resolved(list) => !list.is_empty(),
    }
  }

  /// Materializes the current state for the quick-fix list: the
  /// computing placeholder, or one resolution per command/action.
  pub fn resolutions(
    &self,
    uri: &str,
    kind: OperationKind,
    preferred: Option<&str>,
    request_builder: &dyn Fn(&ConnectionHandle) -> Value,
  ) -> Vec<MarkerResolution> {
    match self.query(uri, kind, preferred, request_builder) {
      QueryOutcome::Computing => vec![MarkerResolution::Computing],
      QueryOutcome::Resolved(list) => {
        list
          .into_iter()
          .map(|entry| {
            match entry {
              CodeActionOrCommand::Command(command) => MarkerResolution::Command(command),
              CodeActionOrCommand::CodeAction(action) => MarkerResolution::CodeAction(action),
            }
          })
          .collect()
      },
    }
  }
}

fn notify_observers(observers: &Mutex<Vec<Arc<dyn RefreshObserver>>>, key: &QueryKey) {
  // Snapshot under the lock, call outside it.
  let observers = observers.lock().clone();
  for observer in observers {
    observer.results_ready(key);
  }
}
