//! 审批门：提议调用的分类、挂起与裁决
//!
//! classify 为纯分类（副作用标记 + 审批标记 + 放行模式 + 会话级全量放行开关）；
//! submit_for_approval 登记挂起并返回可等待句柄，整个轮次中唯一允许无限挂起的点；
//! resolve 每句柄恰好一次，重复裁决与未知句柄是协议错误，拒绝而非吞掉。
//! cancel_all 在轮次取消时将所有挂起句柄裁决为 Denied。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::capability::{canonical_invocation, CapabilityContract};
use crate::core::ApprovalProtocolError;
use crate::planner::ProposedCall;

/// 审批句柄 id
pub type HandleId = u64;

/// 外部裁决
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Denied,
}

/// 分类结果：立即执行或等待外部裁决
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    AutoApproved,
    RequiresApproval,
}

/// 单个 ProposedCall 的终态判定（Pending 为过渡态）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDecision {
    AutoApproved,
    Approved,
    Denied,
    Pending,
}

impl CallDecision {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CallDecision::Pending)
    }
}

/// 挂起中的审批请求（供审批面板列出）
#[derive(Debug, Clone, Serialize)]
pub struct PendingRequest {
    pub handle: HandleId,
    pub call_id: String,
    pub capability: String,
    pub summary: String,
}

enum Slot {
    Waiting(oneshot::Sender<Decision>),
    Resolved(Decision),
}

/// 可等待的审批句柄；审批面板（人或自动开关）经 gate.resolve 裁决后 decided 返回
pub struct PendingHandle {
    pub id: HandleId,
    rx: oneshot::Receiver<Decision>,
}

impl PendingHandle {
    /// 等待裁决；门被整体丢弃视为 Denied
    pub async fn decided(self) -> Decision {
        self.rx.await.unwrap_or(Decision::Denied)
    }
}

/// 审批门
pub struct ApprovalGate {
    /// 会话级全量放行开关（测试/信任模式）；非逐调用覆盖
    auto_approve_all: AtomicBool,
    next_handle: AtomicU64,
    slots: Mutex<HashMap<HandleId, Slot>>,
    requests: Mutex<HashMap<HandleId, PendingRequest>>,
    /// 新挂起请求通知（审批面板可订阅）
    notify_tx: Mutex<Option<mpsc::UnboundedSender<PendingRequest>>>,
}

impl ApprovalGate {
    pub fn new(auto_approve_all: bool) -> Self {
        Self {
            auto_approve_all: AtomicBool::new(auto_approve_all),
            next_handle: AtomicU64::new(1),
            slots: Mutex::new(HashMap::new()),
            requests: Mutex::new(HashMap::new()),
            notify_tx: Mutex::new(None),
        }
    }

    pub fn set_auto_approve(&self, enabled: bool) {
        self.auto_approve_all.store(enabled, Ordering::SeqCst);
    }

    pub fn auto_approve(&self) -> bool {
        self.auto_approve_all.load(Ordering::SeqCst)
    }

    /// 审批面板订阅新挂起请求
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PendingRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.notify_tx.lock().unwrap() = Some(tx);
        rx
    }

    /// 分类：无副作用永远放行；全量放行开关打开时一律放行；
    /// 否则按审批标记与放行模式（匹配规范化调用串）判定。
    pub fn classify(&self, call: &ProposedCall, contract: &CapabilityContract) -> Classification {
        if !contract.side_effects {
            return Classification::AutoApproved;
        }
        if self.auto_approve() {
            return Classification::AutoApproved;
        }
        if !contract.requires_approval {
            return Classification::AutoApproved;
        }
        if let Some(pattern) = &contract.allow_pattern {
            if pattern.is_match(&canonical_invocation(&call.capability, &call.args)) {
                return Classification::AutoApproved;
            }
        }
        Classification::RequiresApproval
    }

    /// 登记挂起调用，返回可等待句柄；不阻塞当前任务
    pub fn submit_for_approval(
        &self,
        call_id: impl Into<String>,
        capability: impl Into<String>,
        summary: impl Into<String>,
    ) -> PendingHandle {
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let request = PendingRequest {
            handle: id,
            call_id: call_id.into(),
            capability: capability.into(),
            summary: summary.into(),
        };
        self.slots.lock().unwrap().insert(id, Slot::Waiting(tx));
        self.requests.lock().unwrap().insert(id, request.clone());
        if let Some(tx) = self.notify_tx.lock().unwrap().as_ref() {
            let _ = tx.send(request);
        }
        PendingHandle { id, rx }
    }

    /// 裁决句柄；每句柄恰好一次。重复裁决 → AlreadyResolved，未知句柄 → UnknownHandle。
    pub fn resolve(
        &self,
        handle: HandleId,
        decision: Decision,
    ) -> Result<(), ApprovalProtocolError> {
        let mut slots = self.slots.lock().unwrap();
        match slots.get(&handle) {
            None => Err(ApprovalProtocolError::UnknownHandle(handle)),
            Some(Slot::Resolved(_)) => Err(ApprovalProtocolError::AlreadyResolved(handle)),
            Some(Slot::Waiting(_)) => {
                let Some(Slot::Waiting(tx)) = slots.insert(handle, Slot::Resolved(decision)) else {
                    unreachable!("slot state checked above");
                };
                // 等待方已放弃（轮次取消）时发送失败，裁决仍记为已完成
                let _ = tx.send(decision);
                self.requests.lock().unwrap().remove(&handle);
                Ok(())
            }
        }
    }

    /// 当前挂起请求（按句柄序）
    pub fn pending(&self) -> Vec<PendingRequest> {
        let mut list: Vec<PendingRequest> = self.requests.lock().unwrap().values().cloned().collect();
        list.sort_by_key(|r| r.handle);
        list
    }

    /// 轮次取消：所有挂起句柄裁决为 Denied
    pub fn cancel_all(&self) {
        let mut slots = self.slots.lock().unwrap();
        let waiting: Vec<HandleId> = slots
            .iter()
            .filter_map(|(id, slot)| matches!(slot, Slot::Waiting(_)).then_some(*id))
            .collect();
        for id in waiting {
            if let Some(Slot::Waiting(tx)) = slots.insert(id, Slot::Resolved(Decision::Denied)) {
                let _ = tx.send(Decision::Denied);
            }
            self.requests.lock().unwrap().remove(&id);
        }
    }
}
