use std::{
  collections::HashMap,
  sync::Arc,
};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
  buffer::TextBuffer,
  storage::{
    BufferStorage,
    StorageError,
  },
};

/// One buffer instance shared by every connected party. Sharing a single
/// instance is what protects an already-open editor from lost updates.
pub type SharedBuffer = Arc<Mutex<TextBuffer>>;

struct OpenEntry {
  buffer:      SharedBuffer,
  connections: usize,
}

/// Reference-counted registry of open buffers, keyed by URI.
///
/// The first `connect` for a URI loads the buffer from storage; the last
/// `disconnect` commits it and drops the instance. Connect/disconnect
/// calls must pair up: disconnecting a URI that is not connected is a
/// programming error and panics.
pub struct BufferManager {
  storage: Arc<dyn BufferStorage>,
  open:    Mutex<HashMap<String, OpenEntry>>,
}

impl BufferManager {
  pub fn new(storage: Arc<dyn BufferStorage>) -> Self {
    Self {
      storage,
      open: Mutex::new(HashMap::new()),
    }
  }

  pub fn storage(&self) -> &Arc<dyn BufferStorage> {
    &self.storage
  }

  pub fn is_connected(&self, uri: &str) -> bool {
    self.open.lock().contains_key(uri)
  }

  pub fn connection_count(&self, uri: &str) -> usize {
    self
      .open
      .lock()
      .get(uri)
      .map(|entry| entry.connections)
      .unwrap_or(0)
  }

  /// Returns the open buffer for `uri` without taking a connection.
  /// The caller shares the instance but owes no disconnect.
  pub fn get(&self, uri: &str) -> Option<SharedBuffer> {
    self.open.lock().get(uri).map(|entry| Arc::clone(&entry.buffer))
  }

  pub fn connect(&self, uri: &str) -> Result<SharedBuffer, StorageError> {
    let mut open = self.open.lock();
    if let Some(entry) = open.get_mut(uri) {
      entry.connections += 1;
      return Ok(Arc::clone(&entry.buffer));
    }

    let text = self.storage.load(uri)?;
    debug!(uri, "buffer connected");
    let buffer: SharedBuffer = Arc::new(Mutex::new(TextBuffer::new(uri, text)));
    open.insert(uri.to_string(), OpenEntry {
      buffer: Arc::clone(&buffer),
      connections: 1,
    });
    Ok(buffer)
  }

  /// Commits the buffer if it is open and dirty. Safe to call at any
  /// time; committing a clean or unopened buffer does nothing.
  pub fn commit(&self, uri: &str) -> Result<(), StorageError> {
    let open = self.open.lock();
    let Some(entry) = open.get(uri) else {
      return Ok(());
    };
    let mut buffer = entry.buffer.lock();
    if buffer.is_dirty() {
      self.storage.save(uri, buffer.text())?;
      buffer.mark_saved();
    }
    Ok(())
  }

  pub fn disconnect(&self, uri: &str) -> Result<(), StorageError> {
    let mut open = self.open.lock();
    let entry = open
      .get_mut(uri)
      .unwrap_or_else(|| panic!("disconnect without matching connect: {uri}"));
    assert!(entry.connections > 0, "connection count underflow: {uri}");

    if entry.connections > 1 {
      entry.connections -= 1;
      return Ok(());
    }

    let mut buffer = entry.buffer.lock();
    if buffer.is_dirty() {
      self.storage.save(uri, buffer.text())?;
      buffer.mark_saved();
    }
    drop(buffer);
    open.remove(uri);
    debug!(uri, "buffer disconnected");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::MemoryStorage;

  fn manager_with(uri: &str, contents: &str) -> (Arc<MemoryStorage>, BufferManager) {
    let storage = Arc::new(MemoryStorage::new());
    storage.insert(uri, contents);
    let manager = BufferManager::new(Arc::clone(&storage) as Arc<dyn BufferStorage>);
    (storage, manager)
  }

  #[test]
  fn nested_connects_share_one_instance_and_commit_once() {
    let uri = "mem:doc";
    let (storage, manager) = manager_with(uri, "foo bar");

    let first = manager.connect(uri).expect("first connect");
    let second = manager.connect(uri).expect("second connect");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(manager.connection_count(uri), 2);

    first.lock().replace(4..7, "baz").expect("edit");

    manager.disconnect(uri).expect("inner disconnect");
    assert!(manager.is_connected(uri));
    assert_eq!(storage.save_count(uri), 0);

    manager.disconnect(uri).expect("outer disconnect");
    assert!(!manager.is_connected(uri));
    assert_eq!(storage.save_count(uri), 1);
    assert_eq!(storage.contents(uri).as_deref(), Some("foo baz"));
  }

  #[test]
  #[should_panic(expected = "disconnect without matching connect")]
  fn unbalanced_disconnect_panics() {
    let (_, manager) = manager_with("mem:doc", "x");
    manager.connect("mem:doc").expect("connect");
    manager.disconnect("mem:doc").expect("disconnect");
    let _ = manager.disconnect("mem:doc");
  }

  #[test]
  fn commit_is_idempotent() {
    let uri = "mem:doc";
    let (storage, manager) = manager_with(uri, "foo");

    let buffer = manager.connect(uri).expect("connect");
    buffer.lock().replace(0..3, "bar").expect("edit");

    manager.commit(uri).expect("commit");
    manager.commit(uri).expect("second commit");
    assert_eq!(storage.save_count(uri), 1);

    manager.disconnect(uri).expect("disconnect");
    // Already clean at disconnect time, so no further save.
    assert_eq!(storage.save_count(uri), 1);
  }
}
