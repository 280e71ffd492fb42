//! 核心层：错误分层与任务调度

pub mod error;
pub mod scheduler;

pub use error::{AgentError, ApprovalProtocolError, CapabilityError};
pub use scheduler::TaskScheduler;
