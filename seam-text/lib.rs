mod buffer;
mod manager;
mod storage;

pub use buffer::{
  BufferError,
  InverseEdit,
  TextBuffer,
};
pub use manager::{
  BufferManager,
  SharedBuffer,
};
pub use storage::{
  BufferStorage,
  FsStorage,
  MemoryStorage,
  ResourceKind,
  StorageError,
};
