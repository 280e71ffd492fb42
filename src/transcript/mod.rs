//! 转写层：条目类型、追加式日志、持久化

pub mod entry;
pub mod log;
pub mod persistence;

pub use entry::{CallOutcome, CallResult, Message, Role, TranscriptEntry};
pub use log::Transcript;
pub use persistence::TranscriptPersistence;
