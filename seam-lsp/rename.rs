use std::{
  sync::{
    Arc,
    atomic::{
      AtomicU64,
      Ordering,
    },
    mpsc::RecvTimeoutError,
  },
  time::Duration,
};

use seam_text::{
  BufferManager,
  StorageError,
};
use thiserror::Error;
use tracing::debug;

use crate::{
  capabilities::OperationKind,
  change::{
    ChangeError,
    ProtocolTextChange,
  },
  jsonrpc::Request,
  protocol::{
    self,
    LspDocumentEdit,
    LspPosition,
    ProtocolParseError,
  },
  registry::ConnectionRegistry,
  selector,
};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
pub enum RenameError {
  #[error("no connected server provides rename")]
  NoProvider,
  #[error("rename request timed out")]
  Timeout,
  #[error("connection closed before the rename response arrived")]
  ConnectionClosed,
  #[error("rename failed: {message} (code {code})")]
  Server { code: i64, message: String },
  #[error(transparent)]
  Protocol(#[from] ProtocolParseError),
  #[error(transparent)]
  Change(#[from] ChangeError),
  #[error(transparent)]
  Storage(#[from] StorageError),
}

/// Whether the rename command should be offered right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameEnablement {
  Enabled,
  Disabled,
  /// A session that might provide rename is still connecting; the
  /// caller re-evaluates once it is up instead of blocking the UI.
  Deferred,
}

/// Bounded enablement check. The bound keeps menu population snappy:
/// a session that cannot report its capabilities in time defers the
/// decision rather than disabling the command outright.
pub fn rename_enabled(
  registry: &dyn ConnectionRegistry,
  uri: &str,
  wait: Duration,
) -> RenameEnablement {
  let matching = selector::select_ready_bounded(registry, uri, OperationKind::Rename, wait);
  if !matching.is_empty() {
    return RenameEnablement::Enabled;
  }

  let still_connecting = registry
    .list_connections(uri)
    .iter()
    .any(|connection| connection.capabilities().is_none());
  if still_connecting {
    debug!(uri, "rename enablement deferred until session is ready");
    RenameEnablement::Deferred
  } else {
    RenameEnablement::Disabled
  }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RenameSummary {
  pub documents: usize,
  pub edits:     usize,
}

/// Renames the symbol at `position` across the workspace.
///
/// The request goes to the first connection providing rename for the
/// resource; the returned workspace edit is applied document by
/// document, edits back to front so earlier offsets stay valid.
pub fn rename(
  registry: &dyn ConnectionRegistry,
  manager: &Arc<BufferManager>,
  uri: &str,
  position: LspPosition,
  new_name: &str,
  timeout: Duration,
) -> Result<RenameSummary, RenameError> {
  let connections = selector::select(registry, uri, OperationKind::Rename, None);
  let Some(connection) = connections.into_iter().next() else {
    return Err(RenameError::NoProvider);
  };

  let request = Request::new(
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
    OperationKind::Rename.method(),
    Some(protocol::rename_params(uri, position, new_name)),
  );
  debug!(id = %connection.id(), uri, new_name, "dispatching rename");
  let response = match connection.dispatch().send(request).recv_timeout(timeout) {
    Ok(response) => response,
    Err(RecvTimeoutError::Timeout) => return Err(RenameError::Timeout),
    Err(RecvTimeoutError::Disconnected) => return Err(RenameError::ConnectionClosed),
  };
  if let Some(error) = response.error {
    return Err(RenameError::Server {
      code:    error.code,
      message: error.message,
    });
  }

  let Some(edit) = protocol::parse_workspace_edit_response(response.result.as_ref())? else {
    // The server had nothing to rename.
    return Ok(RenameSummary::default());
  };

  let mut summary = RenameSummary::default();
  for document in &edit.documents {
    // Pin the document across its edits so it is loaded and saved once
    // for the whole batch.
    manager.connect(&document.uri)?;
    let applied = apply_document_edits(manager, document);
    let released = manager.disconnect(&document.uri);
    summary.edits += applied?;
    released?;
    summary.documents += 1;
  }
  Ok(summary)
}

fn apply_document_edits(
  manager: &Arc<BufferManager>,
  document: &LspDocumentEdit,
) -> Result<usize, RenameError> {
  let mut edits = document.edits.clone();
  edits.sort_by(|a, b| b.range.start.cmp(&a.range.start));

  for edit in &edits {
    let mut change = ProtocolTextChange::new(
      Arc::clone(manager),
      &document.uri,
      edit.range,
      &edit.new_text,
    );
    change.perform()?;
  }
  Ok(edits.len())
}
