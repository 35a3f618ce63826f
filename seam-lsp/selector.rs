use std::time::{
  Duration,
  Instant,
};

use tracing::debug;

use crate::{
  capabilities::{
    self,
    OperationKind,
  },
  registry::{
    ConnectionHandle,
    ConnectionRegistry,
  },
};

/// Connections to fan a request out to.
///
/// A preferred session (the one that produced the related prior result,
/// e.g. the diagnostic behind a marker) short-circuits the search when
/// it is still live: continuity with the originating server beats
/// completeness. Its capabilities may still be unknown, which counts as
/// a match for the reuse case only. Without a usable preferred session,
/// every ready connection matching the capability predicate is
/// returned; results are aggregated downstream, not deduplicated here.
pub fn select(
  registry: &dyn ConnectionRegistry,
  uri: &str,
  kind: OperationKind,
  preferred: Option<&str>,
) -> Vec<ConnectionHandle> {
  if let Some(definition_id) = preferred {
    if let Some(connection) = registry.get_connection(uri, definition_id) {
      if connection.is_live() && capabilities::matches_or_unknown(connection.capabilities(), kind) {
        debug!(id = %connection.id(), ?kind, "reusing preferred session");
        return vec![connection];
      }
    }
  }

  registry
    .list_connections(uri)
    .into_iter()
    .filter(|connection| capabilities::matches(connection.capabilities(), kind))
    .collect()
}

/// Synchronous enablement variant: still-connecting sessions get a
/// short bounded chance to come up before being counted out. A timeout
/// is "no match yet" — the caller re-evaluates when the session
/// becomes ready, it is not an error.
pub fn select_ready_bounded(
  registry: &dyn ConnectionRegistry,
  uri: &str,
  kind: OperationKind,
  timeout: Duration,
) -> Vec<ConnectionHandle> {
  let deadline = Instant::now() + timeout;
  let mut matching = Vec::new();

  for connection in registry.list_connections(uri) {
    if capabilities::matches(connection.capabilities(), kind) {
      matching.push(connection);
      continue;
    }
    if connection.capabilities().is_some() {
      continue;
    }

    let remaining = deadline.saturating_duration_since(Instant::now());
    let became_ready = registry.await_ready(
      &connection,
      &|capabilities| capabilities::matches(capabilities, kind),
      remaining,
    );
    if became_ready {
      if let Some(refreshed) = registry.get_connection(uri, connection.id()) {
        matching.push(refreshed);
      }
    } else {
      debug!(id = %connection.id(), ?kind, "session not ready within bound");
    }
  }

  matching
}
