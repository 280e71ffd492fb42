//! 记忆层：记录、存储接口、生命周期管理

pub mod lifecycle;
pub mod record;
pub mod store;

pub use lifecycle::{
    ConflictJudge, FixedApprover, GateReplaceApprover, LifecycleOutcome, MemoryLifecycle,
    NoConflictJudge, PlannerConflictJudge, ReplaceApprover, SaveReport,
};
pub use record::{normalize_tags, MemoryRecord};
pub use store::{InMemoryRecordStore, RecordStore, SqliteRecordStore};
