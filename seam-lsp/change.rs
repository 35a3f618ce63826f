use std::sync::Arc;

use seam_text::{
  BufferError,
  BufferManager,
  ResourceKind,
  SharedBuffer,
  StorageError,
};
use thiserror::Error;
use tracing::{
  debug,
  warn,
};

use crate::{
  offsets::{
    self,
    PositionError,
  },
  protocol::LspRange,
};

#[derive(Debug, Error)]
pub enum ChangeError {
  #[error("undo is not supported for protocol text changes")]
  UnsupportedUndo,
  #[error(transparent)]
  Position(#[from] PositionError),
  #[error(transparent)]
  Buffer(#[from] BufferError),
  #[error(transparent)]
  Storage(#[from] StorageError),
}

/// The replacement after position translation: protocol line/character
/// pairs pinned down to char offsets in the buffer snapshot the change
/// was acquired against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedReplace {
  pub start: usize,
  pub end:   usize,
}

/// How the document was obtained, which decides what release owes.
#[derive(Debug)]
enum DocumentChangeDelegate {
  /// The buffer was already open in the editor; the edit lands in the
  /// shared instance and the editor keeps ownership of saving.
  OpenDocument,
  /// The buffer was connected for this change; the final release
  /// disconnects it, persisting any pending modification.
  FileBuffer { kind: ResourceKind },
}

struct Acquired {
  buffer:   SharedBuffer,
  delegate: DocumentChangeDelegate,
  staged:   StagedReplace,
  count:    usize,
}

/// Result of a performed change. Refactoring frameworks expect a change
/// object they can invert; the protocol offers no reliable inverse, so
/// `undo` refuses rather than producing a wrong one.
#[derive(Debug)]
pub struct PerformedChange {
  uri:      String,
  replaced: String,
}

impl PerformedChange {
  pub fn uri(&self) -> &str {
    &self.uri
  }

  /// The text the edit overwrote.
  pub fn replaced_text(&self) -> &str {
    &self.replaced
  }

  pub fn undo(&self) -> Result<ProtocolTextChange, ChangeError> {
    Err(ChangeError::UnsupportedUndo)
  }
}

/// One protocol text edit bound to the document it targets. A missing
/// range means the whole document gets replaced.
///
/// The change pins the buffer between `acquire` and `release` so the
/// offsets staged at acquire time stay valid, then applies the
/// replacement on `perform`. Every exit path releases what was
/// acquired, including translation failures and apply failures.
/// Mismatched acquire/release panics: that is a caller bug, not a
/// runtime condition.
pub struct ProtocolTextChange {
  manager:  Arc<BufferManager>,
  uri:      String,
  range:    Option<LspRange>,
  new_text: String,
  acquired: Option<Acquired>,
}

impl ProtocolTextChange {
  pub fn new(
    manager: Arc<BufferManager>,
    uri: impl Into<String>,
    range: LspRange,
    new_text: impl Into<String>,
  ) -> Self {
    Self {
      manager,
      uri: uri.into(),
      range: Some(range),
      new_text: new_text.into(),
      acquired: None,
    }
  }

  /// A change that replaces the full document, whatever its length is
  /// at apply time.
  pub fn whole_document(
    manager: Arc<BufferManager>,
    uri: impl Into<String>,
    new_text: impl Into<String>,
  ) -> Self {
    Self {
      manager,
      uri: uri.into(),
      range: None,
      new_text: new_text.into(),
      acquired: None,
    }
  }

  /// The resource this change modifies.
  pub fn modified_element(&self) -> &str {
    &self.uri
  }

  /// Validation hook for refactoring pipelines. The change validates
  /// lazily at acquire time instead, so there is nothing to precompute.
  pub fn initialize_validation_data(&self) {}

  /// The staged replacement is re-derived against the live buffer on
  /// every fresh acquire, so a change constructed earlier never goes
  /// stale.
  pub fn is_valid(&self) -> Result<(), ChangeError> {
    Ok(())
  }

  pub fn staged(&self) -> Option<&StagedReplace> {
    self.acquired.as_ref().map(|acquired| &acquired.staged)
  }

  /// Pins the target buffer and translates the protocol range to char
  /// offsets. Re-acquiring an already-acquired change only bumps the
  /// count. An untranslatable range aborts the acquisition and leaves
  /// the buffer exactly as it was found.
  pub fn acquire(&mut self) -> Result<(), ChangeError> {
    if let Some(acquired) = &mut self.acquired {
      acquired.count += 1;
      return Ok(());
    }

    let (buffer, delegate) = match self.manager.get(&self.uri) {
      Some(buffer) => (buffer, DocumentChangeDelegate::OpenDocument),
      None => {
        let buffer = self.manager.connect(&self.uri)?;
        let kind = self.manager.storage().classify(&self.uri);
        (buffer, DocumentChangeDelegate::FileBuffer { kind })
      },
    };

    let staged = {
      let buffer = buffer.lock();
      match self.range {
        Some(range) => {
          offsets::to_offset(range.start, buffer.text()).and_then(|start| {
            offsets::to_offset(range.end, buffer.text()).map(|end| StagedReplace { start, end })
          })
        },
        None => {
          Ok(StagedReplace {
            start: 0,
            end:   buffer.len_chars(),
          })
        },
      }
    };

    let staged = match staged {
      Ok(staged) => staged,
      Err(error) => {
        // Undo the connection before reporting; a failed acquire must
        // not leave the buffer pinned. The translation error is the one
        // worth surfacing.
        if matches!(delegate, DocumentChangeDelegate::FileBuffer { .. }) {
          if let Err(release_error) = self.manager.disconnect(&self.uri) {
            warn!(uri = %self.uri, error = %release_error, "release after failed acquire");
          }
        }
        return Err(error.into());
      },
    };

    debug!(uri = %self.uri, delegate = ?delegate, staged = ?staged, "change acquired");
    self.acquired = Some(Acquired {
      buffer,
      delegate,
      staged,
      count: 1,
    });
    Ok(())
  }

  /// Flushes the buffer for this change's resource to backing storage
  /// if it is open and dirty. Safe to call at any point; idempotent.
  pub fn commit(&self) -> Result<(), ChangeError> {
    self.manager.commit(&self.uri)?;
    Ok(())
  }

  /// Undoes one `acquire`. The final release for a buffer this change
  /// connected disconnects it, which persists a dirty buffer; a buffer
  /// the editor already owned is left untouched.
  pub fn release(&mut self) -> Result<(), ChangeError> {
    let acquired = self
      .acquired
      .as_mut()
      .unwrap_or_else(|| panic!("release without matching acquire: {}", self.uri));

    if acquired.count > 1 {
      acquired.count -= 1;
      return Ok(());
    }

    let acquired = self.acquired.take().expect("checked above");
    match acquired.delegate {
      DocumentChangeDelegate::OpenDocument => {},
      DocumentChangeDelegate::FileBuffer { kind } => {
        debug!(uri = %self.uri, kind = ?kind, "releasing connected buffer");
        self.manager.disconnect(&self.uri)?;
      },
    }
    Ok(())
  }

  /// Applies the staged replacement to an acquired buffer.
  pub fn apply(&mut self) -> Result<PerformedChange, ChangeError> {
    let acquired = self
      .acquired
      .as_ref()
      .unwrap_or_else(|| panic!("apply without acquire: {}", self.uri));

    let inverse = acquired
      .buffer
      .lock()
      .replace(acquired.staged.start..acquired.staged.end, &self.new_text)?;
    Ok(PerformedChange {
      uri:      self.uri.clone(),
      replaced: inverse.replaced,
    })
  }

  /// Acquire, apply, release in one step. The release runs whether or
  /// not the apply succeeded; an apply error wins over a release error.
  pub fn perform(&mut self) -> Result<PerformedChange, ChangeError> {
    self.acquire()?;
    let applied = self.apply();
    let released = self.release();
    let performed = applied?;
    released?;
    Ok(performed)
  }
}

#[cfg(test)]
mod tests {
  use seam_text::MemoryStorage;

  use super::*;
  use crate::protocol::LspPosition;

  const URI: &str = "mem:doc";

  fn manager_with(contents: &str) -> (Arc<MemoryStorage>, Arc<BufferManager>) {
    let storage = Arc::new(MemoryStorage::new());
    storage.insert(URI, contents);
    let manager = Arc::new(BufferManager::new(
      Arc::clone(&storage) as Arc<dyn seam_text::BufferStorage>
    ));
    (storage, manager)
  }

  fn range(line: u32, start: u32, end: u32) -> LspRange {
    LspRange::new(LspPosition::new(line, start), LspPosition::new(line, end))
  }

  #[test]
  fn perform_connects_applies_and_persists() {
    let (storage, manager) = manager_with("foo bar");
    let mut change = ProtocolTextChange::new(Arc::clone(&manager), URI, range(0, 4, 7), "baz");

    let performed = change.perform().expect("perform");
    assert_eq!(performed.replaced_text(), "bar");
    assert_eq!(storage.contents(URI).as_deref(), Some("foo baz"));
    assert_eq!(storage.save_count(URI), 1);
    // The connection taken for the change is gone again.
    assert!(!manager.is_connected(URI));
  }

  #[test]
  fn already_open_buffer_is_edited_in_place_and_never_saved() {
    let (storage, manager) = manager_with("foo bar");
    let editor_buffer = manager.connect(URI).expect("editor connect");

    let mut change = ProtocolTextChange::new(Arc::clone(&manager), URI, range(0, 4, 7), "baz");
    change.perform().expect("perform");

    // The edit landed in the editor's instance; saving stays with the
    // editor.
    assert_eq!(editor_buffer.lock().text().to_string(), "foo baz");
    assert_eq!(storage.save_count(URI), 0);
    assert!(manager.is_connected(URI));

    manager.disconnect(URI).expect("editor disconnect");
    assert_eq!(storage.save_count(URI), 1);
  }

  #[test]
  fn missing_range_replaces_the_whole_document() {
    let (storage, manager) = manager_with("anything at all, any length");
    let mut change = ProtocolTextChange::whole_document(Arc::clone(&manager), URI, "fresh");

    change.acquire().expect("acquire");
    assert_eq!(change.staged(), Some(&StagedReplace { start: 0, end: 27 }));
    change.apply().expect("apply");
    change.release().expect("release");

    assert_eq!(storage.contents(URI).as_deref(), Some("fresh"));
  }

  #[test]
  fn utf16_columns_stage_char_offsets() {
    // '𐐷' is two UTF-16 code units but one char.
    let (storage, manager) = manager_with("a\u{10437}b");
    let mut change = ProtocolTextChange::new(Arc::clone(&manager), URI, range(0, 3, 4), "c");

    change.acquire().expect("acquire");
    assert_eq!(change.staged(), Some(&StagedReplace { start: 2, end: 3 }));
    change.apply().expect("apply");
    change.release().expect("release");

    assert_eq!(storage.contents(URI).as_deref(), Some("a\u{10437}c"));
  }

  #[test]
  fn untranslatable_range_aborts_and_releases() {
    let (storage, manager) = manager_with("short");
    let mut change = ProtocolTextChange::new(Arc::clone(&manager), URI, range(9, 0, 1), "x");

    let result = change.perform();
    assert!(matches!(
      result,
      Err(ChangeError::Position(PositionError::LineOutOfBounds { line: 9, .. }))
    ));
    assert_eq!(storage.contents(URI).as_deref(), Some("short"));
    assert_eq!(storage.save_count(URI), 0);
    assert!(!manager.is_connected(URI));
  }

  #[test]
  fn nested_acquires_connect_once_and_release_once() {
    let (storage, manager) = manager_with("foo bar");
    let mut change = ProtocolTextChange::new(Arc::clone(&manager), URI, range(0, 0, 3), "qux");

    change.acquire().expect("first acquire");
    change.acquire().expect("second acquire");
    assert_eq!(manager.connection_count(URI), 1);

    change.apply().expect("apply");
    change.release().expect("inner release");
    assert!(manager.is_connected(URI));
    assert_eq!(storage.save_count(URI), 0);

    change.release().expect("outer release");
    assert!(!manager.is_connected(URI));
    assert_eq!(storage.save_count(URI), 1);
  }

  #[test]
  #[should_panic(expected = "release without matching acquire")]
  fn unbalanced_release_panics() {
    let (_, manager) = manager_with("foo");
    let mut change = ProtocolTextChange::new(manager, URI, range(0, 0, 1), "x");
    change.acquire().expect("acquire");
    change.release().expect("release");
    let _ = change.release();
  }

  #[test]
  fn commit_while_acquired_is_idempotent() {
    let (storage, manager) = manager_with("foo");
    let mut change = ProtocolTextChange::new(Arc::clone(&manager), URI, range(0, 0, 3), "bar");

    change.acquire().expect("acquire");
    change.apply().expect("apply");
    change.commit().expect("commit");
    change.commit().expect("second commit");
    assert_eq!(storage.save_count(URI), 1);

    change.release().expect("release");
    // Already clean at release time, no further save.
    assert_eq!(storage.save_count(URI), 1);
  }

  #[test]
  fn undo_is_unsupported() {
    let (_, manager) = manager_with("foo");
    let mut change = ProtocolTextChange::new(Arc::clone(&manager), URI, range(0, 0, 3), "bar");
    let performed = change.perform().expect("perform");
    assert!(matches!(performed.undo(), Err(ChangeError::UnsupportedUndo)));
  }

  #[test]
  fn validation_hooks_are_benign() {
    let (_, manager) = manager_with("foo");
    let change = ProtocolTextChange::new(manager, URI, range(0, 0, 1), "x");
    change.initialize_validation_data();
    assert!(change.is_valid().is_ok());
    assert_eq!(change.modified_element(), URI);
    assert!(change.staged().is_none());
  }
}
