use ropey::Rope;
use thiserror::Error;

use crate::protocol::LspPosition;

/// Protocol positions address UTF-16 code units; buffer offsets are
/// char indices. Translation is strict: anything outside the document
/// is an error the caller logs and aborts on, never a clamped offset.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PositionError {
  #[error("line {line} is out of bounds ({lines} lines)")]
  LineOutOfBounds { line: u32, lines: usize },
  #[error("character {character} is out of bounds on line {line}")]
  CharacterOutOfBounds { line: u32, character: u32 },
  #[error("offset {offset} is out of bounds (length {len})")]
  OffsetOutOfBounds { offset: usize, len: usize },
}

pub fn to_offset(position: LspPosition, text: &Rope) -> Result<usize, PositionError> {
  let line = position.line as usize;
  if line >= text.len_lines() {
    return Err(PositionError::LineOutOfBounds {
      line:  position.line,
      lines: text.len_lines(),
    });
  }

  let line_start = text.line_to_char(line);
  let line_end = if line + 1 < text.len_lines() {
    text.line_to_char(line + 1)
  } else {
    text.len_chars()
  };

  let mut utf16_count = 0u32;
  let mut char_idx = line_start;
  for ch in text.slice(line_start..line_end).chars() {
    if utf16_count == position.character {
      return Ok(char_idx);
    }
    utf16_count = utf16_count.saturating_add(ch.len_utf16() as u32);
    char_idx += 1;
    // Landing between the two code units of a surrogate pair is not a
    // valid position either.
    if utf16_count > position.character {
      return Err(PositionError::CharacterOutOfBounds {
        line:      position.line,
        character: position.character,
      });
    }
  }

  if utf16_count == position.character {
    return Ok(char_idx);
  }
  Err(PositionError::CharacterOutOfBounds {
    line:      position.line,
    character: position.character,
  })
}

pub fn to_position(offset: usize, text: &Rope) -> Result<LspPosition, PositionError> {
  if offset > text.len_chars() {
    return Err(PositionError::OffsetOutOfBounds {
      offset,
      len: text.len_chars(),
    });
  }

  let line = text.char_to_line(offset);
  let line_start = text.line_to_char(line);
  let character = text
    .slice(line_start..offset)
    .chars()
    .map(|ch| ch.len_utf16() as u32)
    .sum::<u32>();

  Ok(LspPosition {
    line: line as u32,
    character,
  })
}

#[cfg(test)]
mod tests {
  use quickcheck::quickcheck;

  use super::*;

  #[test]
  fn offsets_on_ascii_lines() {
    let text = Rope::from("foo bar\nsecond line\n");
    assert_eq!(to_offset(LspPosition::new(0, 4), &text), Ok(4));
    assert_eq!(to_offset(LspPosition::new(1, 0), &text), Ok(8));
    assert_eq!(to_offset(LspPosition::new(1, 6), &text), Ok(14));
  }

  #[test]
  fn utf16_columns_count_code_units() {
    // '𐐷' is one char but two UTF-16 code units.
    let text = Rope::from("a𐐷b\n");
    assert_eq!(to_offset(LspPosition::new(0, 0), &text), Ok(0));
    assert_eq!(to_offset(LspPosition::new(0, 1), &text), Ok(1));
    assert_eq!(to_offset(LspPosition::new(0, 3), &text), Ok(2));
    assert_eq!(
      to_offset(LspPosition::new(0, 2), &text),
      Err(PositionError::CharacterOutOfBounds {
        line:      0,
        character: 2,
      })
    );
  }

  #[test]
  fn out_of_bounds_positions_are_errors() {
    let text = Rope::from("one\ntwo");
    assert!(matches!(
      to_offset(LspPosition::new(9, 0), &text),
      Err(PositionError::LineOutOfBounds { line: 9, .. })
    ));
    assert!(matches!(
      to_offset(LspPosition::new(0, 99), &text),
      Err(PositionError::CharacterOutOfBounds { character: 99, .. })
    ));
    assert!(matches!(
      to_position(99, &text),
      Err(PositionError::OffsetOutOfBounds { offset: 99, .. })
    ));
  }

  #[test]
  fn end_of_document_is_addressable() {
    let text = Rope::from("ab");
    assert_eq!(to_offset(LspPosition::new(0, 2), &text), Ok(2));
    assert_eq!(to_position(2, &text), Ok(LspPosition::new(0, 2)));
  }

  quickcheck! {
    fn round_trips_every_valid_offset(text: String, seed: usize) -> bool {
      let rope = Rope::from(text.as_str());
      let offset = seed % (rope.len_chars() + 1);
      let position = to_position(offset, &rope).expect("offset in bounds");
      to_offset(position, &rope) == Ok(offset)
    }
  }
}
