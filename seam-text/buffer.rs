use std::ops::Range;

use ropey::Rope;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BufferError {
  #[error("char range {start}..{end} is out of bounds for buffer of length {len}")]
  RangeOutOfBounds {
    start: usize,
    end:   usize,
    len:   usize,
  },
}

/// In-memory text of one open resource.
///
/// The buffer does not know how it is persisted; the manager commits it
/// through a [`crate::BufferStorage`] when the last connection goes away.
#[derive(Debug, Clone)]
pub struct TextBuffer {
  uri:     String,
  text:    Rope,
  version: u64,
  dirty:   bool,
}

impl TextBuffer {
  pub fn new(uri: impl Into<String>, text: Rope) -> Self {
    Self {
      uri: uri.into(),
      text,
      version: 0,
      dirty: false,
    }
  }

  pub fn uri(&self) -> &str {
    &self.uri
  }

  pub fn text(&self) -> &Rope {
    &self.text
  }

  pub fn len_chars(&self) -> usize {
    self.text.len_chars()
  }

  pub fn version(&self) -> u64 {
    self.version
  }

  pub fn is_dirty(&self) -> bool {
    self.dirty
  }

  /// Replaces `range` (char indices) with `new_text` and returns the
  /// edit that undoes the replacement.
  pub fn replace(&mut self, range: Range<usize>, new_text: &str) -> Result<InverseEdit, BufferError> {
    let len = self.text.len_chars();
    if range.start > range.end || range.end > len {
      return Err(BufferError::RangeOutOfBounds {
        start: range.start,
        end: range.end,
        len,
      });
    }

    let replaced = self.text.slice(range.clone()).to_string();
    self.text.remove(range.clone());
    self.text.insert(range.start, new_text);
    self.version = self.version.wrapping_add(1);
    self.dirty = true;

    Ok(InverseEdit {
      start: range.start,
      inserted_chars: new_text.chars().count(),
      replaced,
    })
  }

  pub(crate) fn mark_saved(&mut self) {
    self.dirty = false;
  }
}

/// Reverse of one [`TextBuffer::replace`], usable as an undo record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InverseEdit {
  pub start:          usize,
  pub inserted_chars: usize,
  pub replaced:       String,
}

impl InverseEdit {
  /// Undoes the originating replace. Returns the redo edit.
  pub fn apply(&self, buffer: &mut TextBuffer) -> Result<InverseEdit, BufferError> {
    buffer.replace(self.start..self.start + self.inserted_chars, &self.replaced)
  }
}
