use serde_json::Value;

/// Operations the integration layer can route to a server, keyed to the
/// provider entry the server declares for them during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
  CodeAction,
  Rename,
  Hover,
  GotoDefinition,
  Completion,
  Format,
}

impl OperationKind {
  pub fn provider_key(self) -> &'static str {
    match self {
      Self::CodeAction => "codeActionProvider",
      Self::Rename => "renameProvider",
      Self::Hover => "hoverProvider",
      Self::GotoDefinition => "definitionProvider",
      Self::Completion => "completionProvider",
      Self::Format => "documentFormattingProvider",
    }
  }

  pub fn method(self) -> &'static str {
    match self {
      Self::CodeAction => "textDocument/codeAction",
      Self::Rename => "textDocument/rename",
      Self::Hover => "textDocument/hover",
      Self::GotoDefinition => "textDocument/definition",
      Self::Completion => "textDocument/completion",
      Self::Format => "textDocument/formatting",
    }
  }
}

/// Capabilities a server declared in its initialize response. Immutable
/// once taken from the handshake.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerCapabilitiesSnapshot {
  raw: Value,
}

impl ServerCapabilitiesSnapshot {
  pub fn from_raw(raw: Value) -> Self {
    Self { raw }
  }

  pub fn raw(&self) -> &Value {
    &self.raw
  }

  /// Provider entries come as either a boolean flag or an options
  /// object: `true` and any non-null object count as support, `false`,
  /// `null` and absent do not.
  pub fn supports(&self, kind: OperationKind) -> bool {
    match self.raw.get(kind.provider_key()) {
      Some(Value::Bool(enabled)) => *enabled,
      Some(Value::Null) | None => false,
      Some(_) => true,
    }
  }
}

/// Strict predicate: a connection whose capabilities are not yet known
/// does not match any operation.
pub fn matches(snapshot: Option<&ServerCapabilitiesSnapshot>, kind: OperationKind) -> bool {
  snapshot.is_some_and(|snapshot| snapshot.supports(kind))
}

/// Lenient variant for re-using a session pinned by prior context: an
/// unknown capability set is assumed to match, a known one is checked.
pub fn matches_or_unknown(
  snapshot: Option<&ServerCapabilitiesSnapshot>,
  kind: OperationKind,
) -> bool {
  snapshot.is_none_or(|snapshot| snapshot.supports(kind))
}
