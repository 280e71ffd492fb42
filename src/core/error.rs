//! 错误类型分层
//!
//! CapabilityError：能力调用失败，携带机器可读 kind，编排层据此统一失败策略；
//! ApprovalProtocolError：审批面板的协议性错误（重复裁决、未知句柄），属宿主集成 bug，立即拒绝；
//! AgentError：编排循环顶层错误。

use thiserror::Error;

/// 能力调用错误：kind 区分可重试（Timeout/Transient）与不可重试（其余）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("Capability timed out after {0}s")]
    Timeout(u64),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Capability not found: {0}")]
    NotFound(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Invalid invocation: {0}")]
    Invalid(String),
}

impl CapabilityError {
    /// 机器可读 kind（写入 CallResult，供规划器区分超时与拒绝）
    pub fn kind(&self) -> &'static str {
        match self {
            CapabilityError::Timeout(_) => "timeout",
            CapabilityError::PermissionDenied(_) => "permission_denied",
            CapabilityError::NotFound(_) => "not_found",
            CapabilityError::Transient(_) => "transient",
            CapabilityError::Invalid(_) => "invalid",
        }
    }

    /// 是否值得重试（超时 / 瞬时失败）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CapabilityError::Timeout(_) | CapabilityError::Transient(_)
        )
    }
}

/// 审批协议错误：每个句柄只能被裁决一次，未知句柄直接拒绝
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApprovalProtocolError {
    #[error("Approval handle {0} already resolved")]
    AlreadyResolved(u64),

    #[error("Unknown approval handle: {0}")]
    UnknownHandle(u64),
}

/// 编排循环顶层错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Planner error: {0}")]
    PlannerError(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("Approval protocol error: {0}")]
    ApprovalProtocol(#[from] ApprovalProtocolError),

    #[error("Turn cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Memory store error: {0}")]
    StoreError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_error_kind() {
        assert_eq!(CapabilityError::Timeout(30).kind(), "timeout");
        assert_eq!(
            CapabilityError::PermissionDenied("x".into()).kind(),
            "permission_denied"
        );
        assert_eq!(CapabilityError::NotFound("x".into()).kind(), "not_found");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(CapabilityError::Timeout(1).is_retryable());
        assert!(CapabilityError::Transient("503".into()).is_retryable());
        assert!(!CapabilityError::PermissionDenied("no".into()).is_retryable());
        assert!(!CapabilityError::Invalid("bad args".into()).is_retryable());
    }
}
