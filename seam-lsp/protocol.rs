use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{
  Value,
  json,
};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct LspPosition {
  pub line:      u32,
  pub character: u32,
}

impl LspPosition {
  pub fn new(line: u32, character: u32) -> Self {
    Self { line, character }
  }

  fn as_json(self) -> Value {
    json!({
      "line": self.line,
      "character": self.character,
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LspRange {
  pub start: LspPosition,
  pub end:   LspPosition,
}

impl LspRange {
  pub fn new(start: LspPosition, end: LspPosition) -> Self {
    Self { start, end }
  }

  fn as_json(self) -> Value {
    json!({
      "start": self.start.as_json(),
      "end": self.end.as_json(),
    })
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LspTextEdit {
  pub range:    LspRange,
  pub new_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LspDocumentEdit {
  pub uri:     String,
  pub version: Option<i32>,
  pub edits:   Vec<LspTextEdit>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LspWorkspaceEdit {
  pub documents: Vec<LspDocumentEdit>,
}

impl LspWorkspaceEdit {
  pub fn is_empty(&self) -> bool {
    self.documents.iter().all(|document| document.edits.is_empty())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LspCommand {
  pub title:     String,
  pub command:   String,
  pub arguments: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LspCodeAction {
  pub title:        String,
  pub kind:         Option<String>,
  pub edit:         Option<LspWorkspaceEdit>,
  pub command:      Option<LspCommand>,
  pub is_preferred: bool,
}

/// The wire union a code-action response carries per entry: a bare
/// command or a full code action. Materialization matches on this, no
/// hierarchy involved.
#[derive(Debug, Clone, PartialEq)]
pub enum CodeActionOrCommand {
  Command(LspCommand),
  CodeAction(LspCodeAction),
}

impl CodeActionOrCommand {
  pub fn title(&self) -> &str {
    match self {
      Self::Command(command) => &command.title,
      Self::CodeAction(action) => &action.title,
    }
  }
}

#[derive(Debug, Error)]
pub enum ProtocolParseError {
  #[error("invalid lsp result shape")]
  InvalidShape,
  #[error("failed to decode lsp payload: {0}")]
  Decode(#[from] serde_json::Error),
}

pub fn code_action_params(uri: &str, range: LspRange, diagnostics: Value) -> Value {
  json!({
    "textDocument": { "uri": uri },
    "range": range.as_json(),
    "context": {
      "diagnostics": diagnostics,
    },
  })
}

pub fn rename_params(uri: &str, position: LspPosition, new_name: &str) -> Value {
  json!({
    "textDocument": { "uri": uri },
    "position": position.as_json(),
    "newName": new_name,
  })
}

pub fn parse_code_actions_response(
  result: Option<&Value>,
) -> Result<Vec<CodeActionOrCommand>, ProtocolParseError> {
  let Some(result) = result else {
    return Ok(Vec::new());
  };
  if result.is_null() {
    return Ok(Vec::new());
  }

  let payload: Vec<CodeActionOrCommandPayload> = serde_json::from_value(result.clone())?;
  Ok(
    payload
      .into_iter()
      .map(CodeActionOrCommandPayload::into_entry)
      .collect(),
  )
}

pub fn parse_workspace_edit_response(
  result: Option<&Value>,
) -> Result<Option<LspWorkspaceEdit>, ProtocolParseError> {
  let Some(result) = result else {
    return Ok(None);
  };
  if result.is_null() {
    return Ok(None);
  }
  let payload: WorkspaceEditPayload = serde_json::from_value(result.clone())?;
  Ok(Some(workspace_edit_from_payload(payload)))
}

fn workspace_edit_from_payload(payload: WorkspaceEditPayload) -> LspWorkspaceEdit {
  let mut per_uri: BTreeMap<String, LspDocumentEdit> = BTreeMap::new();

  for (uri, edits) in payload.changes {
    let entry = per_uri.entry(uri.clone()).or_insert_with(|| {
      LspDocumentEdit {
        uri,
        version: None,
        edits: Vec::new(),
      }
    });
    entry
      .edits
      .extend(edits.into_iter().map(TextEditPayload::into_text_edit));
  }

  for change in payload.document_changes {
    let DocumentChangePayload::TextDocumentEdit {
      text_document,
      edits,
    } = change
    else {
      // Resource operations (create/rename/delete files) are out of
      // scope for the applier.
      continue;
    };

    let entry = per_uri.entry(text_document.uri.clone()).or_insert_with(|| {
      LspDocumentEdit {
        uri:     text_document.uri.clone(),
        version: text_document.version,
        edits:   Vec::new(),
      }
    });
    if entry.version.is_none() {
      entry.version = text_document.version;
    }
    entry
      .edits
      .extend(edits.into_iter().map(TextEditPayload::into_text_edit));
  }

  LspWorkspaceEdit {
    documents: per_uri.into_values().collect(),
  }
}

// Order matters: a command's `command` field is a string, so a code
// action carrying a nested command object falls through to the second
// variant.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CodeActionOrCommandPayload {
  Command(CommandPayload),
  Action(CodeActionPayload),
}

impl CodeActionOrCommandPayload {
  fn into_entry(self) -> CodeActionOrCommand {
    match self {
      Self::Command(command) => CodeActionOrCommand::Command(command.into_command()),
      Self::Action(action) => CodeActionOrCommand::CodeAction(action.into_code_action()),
    }
  }
}

#[derive(Debug, Deserialize)]
struct CommandPayload {
  title:     String,
  command:   String,
  arguments: Option<Vec<Value>>,
}

impl CommandPayload {
  fn into_command(self) -> LspCommand {
    LspCommand {
      title:     self.title,
      command:   self.command,
      arguments: self.arguments,
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CodeActionPayload {
  title:        String,
  kind:         Option<String>,
  edit:         Option<WorkspaceEditPayload>,
  command:      Option<CommandPayload>,
  is_preferred: Option<bool>,
}

impl CodeActionPayload {
  fn into_code_action(self) -> LspCodeAction {
    LspCodeAction {
      title:        self.title,
      kind:         self.kind,
      edit:         self
        .edit
        .map(workspace_edit_from_payload)
        .filter(|edit| !edit.is_empty()),
      command:      self.command.map(CommandPayload::into_command),
      is_preferred: self.is_preferred.unwrap_or(false),
    }
  }
}

#[derive(Debug, Deserialize)]
struct WorkspaceEditPayload {
  #[serde(default)]
  changes:          BTreeMap<String, Vec<TextEditPayload>>,
  #[serde(default, rename = "documentChanges")]
  document_changes: Vec<DocumentChangePayload>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DocumentChangePayload {
  TextDocumentEdit {
    #[serde(rename = "textDocument")]
    text_document: VersionedTextDocumentPayload,
    edits:         Vec<TextEditPayload>,
  },
  ResourceOperation {
    kind: String,
  },
}

#[derive(Debug, Deserialize)]
struct VersionedTextDocumentPayload {
  uri:     String,
  version: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct TextEditPayload {
  range:    RangePayload,
  #[serde(rename = "newText")]
  new_text: String,
}

impl TextEditPayload {
  fn into_text_edit(self) -> LspTextEdit {
    LspTextEdit {
      range:    self.range.into_range(),
      new_text: self.new_text,
    }
  }
}

#[derive(Debug, Deserialize)]
struct RangePayload {
  start: PositionPayload,
  end:   PositionPayload,
}

impl RangePayload {
  fn into_range(self) -> LspRange {
    LspRange {
      start: self.start.into_position(),
      end:   self.end.into_position(),
    }
  }
}

#[derive(Debug, Deserialize)]
struct PositionPayload {
  line:      u32,
  character: u32,
}

impl PositionPayload {
  fn into_position(self) -> LspPosition {
    LspPosition {
      line:      self.line,
      character: self.character,
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn parses_mixed_commands_and_actions() {
    let value = json!([
      {
        "title": "Organize imports",
        "command": "editor.organizeImports",
        "arguments": ["file:///tmp/a.rs"]
      },
      {
        "title": "Fix typo",
        "kind": "quickfix",
        "isPreferred": true,
        "edit": {
          "changes": {
            "file:///tmp/a.rs": [
              {
                "range": {
                  "start": { "line": 0, "character": 0 },
                  "end": { "line": 0, "character": 3 }
                },
                "newText": "fixed"
              }
            ]
          }
        }
      },
      {
        "title": "Run fixer",
        "command": { "title": "fixer", "command": "tool.fix" }
      }
    ]);

    let parsed = parse_code_actions_response(Some(&value)).expect("parse");
    assert_eq!(parsed.len(), 3);
    assert!(matches!(parsed[0], CodeActionOrCommand::Command(_)));
    match &parsed[1] {
      CodeActionOrCommand::CodeAction(action) => {
        assert!(action.is_preferred);
        assert_eq!(action.kind.as_deref(), Some("quickfix"));
        assert!(action.edit.is_some());
      },
      other => panic!("expected code action, got {other:?}"),
    }
    // Nested command object must not be mistaken for a bare command.
    match &parsed[2] {
      CodeActionOrCommand::CodeAction(action) => {
        assert_eq!(action.command.as_ref().map(|c| c.command.as_str()), Some("tool.fix"));
      },
      other => panic!("expected code action, got {other:?}"),
    }
  }

  #[test]
  fn null_result_parses_to_empty() {
    let parsed = parse_code_actions_response(Some(&Value::Null)).expect("parse");
    assert!(parsed.is_empty());
    assert!(parse_code_actions_response(None).expect("parse").is_empty());
  }

  #[test]
  fn workspace_edit_merges_changes_and_document_changes() {
    let value = json!({
      "changes": {
        "file:///tmp/a.rs": [
          {
            "range": {
              "start": { "line": 0, "character": 0 },
              "end": { "line": 0, "character": 1 }
            },
            "newText": "x"
          }
        ]
      },
      "documentChanges": [
        {
          "textDocument": { "uri": "file:///tmp/b.rs", "version": 4 },
          "edits": [
            {
              "range": {
                "start": { "line": 1, "character": 0 },
                "end": { "line": 1, "character": 2 }
              },
              "newText": "y"
            }
          ]
        },
        { "kind": "create", "uri": "file:///tmp/c.rs" }
      ]
    });

    let parsed = parse_workspace_edit_response(Some(&value))
      .expect("parse")
      .expect("edit present");
    assert_eq!(parsed.documents.len(), 2);
    assert_eq!(parsed.documents[1].version, Some(4));
  }

  #[test]
  fn rename_params_shape() {
    let value = rename_params("file:///tmp/a.rs", LspPosition::new(3, 7), "renamed");
    assert_eq!(
      value,
      json!({
        "textDocument": { "uri": "file:///tmp/a.rs" },
        "position": { "line": 3, "character": 7 },
        "newName": "renamed",
      })
    );
  }
}
