mod capabilities;
mod change;
mod coordinator;
mod jsonrpc;
mod offsets;
mod protocol;
mod registry;
mod rename;
mod selector;

pub use capabilities::{
  OperationKind,
  ServerCapabilitiesSnapshot,
};
pub use change::{
  ChangeError,
  PerformedChange,
  ProtocolTextChange,
  StagedReplace,
};
pub use coordinator::{
  AttributeStore,
  CoordinatorConfig,
  MarkerResolution,
  MemoryAttributeStore,
  PendingActions,
  QueryKey,
  QueryOutcome,
  RefreshObserver,
  RequestCoordinator,
};
pub use jsonrpc::{
  Id,
  Request,
  RequestDispatch,
  Response,
  ResponseError,
  Version,
};
pub use offsets::{
  PositionError,
  to_offset,
  to_position,
};
pub use protocol::{
  CodeActionOrCommand,
  LspCodeAction,
  LspCommand,
  LspDocumentEdit,
  LspPosition,
  LspRange,
  LspTextEdit,
  LspWorkspaceEdit,
  ProtocolParseError,
  code_action_params,
  parse_code_actions_response,
  parse_workspace_edit_response,
  rename_params,
};
pub use registry::{
  ConnectionHandle,
  ConnectionRegistry,
  ConnectionState,
  SessionRegistry,
};
pub use rename::{
  RenameEnablement,
  RenameError,
  RenameSummary,
  rename,
  rename_enabled,
};
pub use selector::{
  select,
  select_ready_bounded,
};
