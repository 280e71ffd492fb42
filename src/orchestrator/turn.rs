//! 轮次状态
//!
//! 一个轮次 = 一次用户输入到最终回复。登记每个 ProposedCall 的判定
//! （恰好一个终态，Pending 为过渡态）、按能力累计失败次数（重试上限用）、步数。

use std::collections::HashMap;

use uuid::Uuid;

use crate::approval::CallDecision;
use crate::core::AgentError;
use crate::planner::ProposedCall;

/// 轮次状态：判定登记与重试计数
#[derive(Debug)]
pub struct Turn {
    turn_id: Uuid,
    steps: usize,
    decisions: HashMap<String, CallDecision>,
    failure_counts: HashMap<String, u32>,
}

impl Turn {
    pub fn new() -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            steps: 0,
            decisions: HashMap::new(),
            failure_counts: HashMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.turn_id
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn advance_step(&mut self) {
        self.steps += 1;
    }

    /// 登记提议调用（判定置 Pending）；call_id 轮次内重复属规划器格式违规
    pub fn register_call(&mut self, call: &ProposedCall) -> Result<(), AgentError> {
        if self.decisions.contains_key(&call.id) {
            return Err(AgentError::JsonParseError(format!(
                "duplicate call id within turn: {}",
                call.id
            )));
        }
        self.decisions.insert(call.id.clone(), CallDecision::Pending);
        Ok(())
    }

    /// 全有或全无地登记一步内的全部调用；任一 id 重复则整步不登记
    pub fn register_calls(&mut self, calls: &[ProposedCall]) -> Result<(), AgentError> {
        for (i, call) in calls.iter().enumerate() {
            let dup_in_step = calls[..i].iter().any(|c| c.id == call.id);
            if dup_in_step || self.decisions.contains_key(&call.id) {
                return Err(AgentError::JsonParseError(format!(
                    "duplicate call id within turn: {}",
                    call.id
                )));
            }
        }
        for call in calls {
            self.decisions.insert(call.id.clone(), CallDecision::Pending);
        }
        Ok(())
    }

    /// 记录终态判定；已有不同终态的重复记录是内部不变量违规，保留首个并记日志
    pub fn record_decision(&mut self, call_id: &str, decision: CallDecision) {
        match self.decisions.get_mut(call_id) {
            Some(current @ CallDecision::Pending) => *current = decision,
            Some(current) if *current == decision => {}
            Some(current) => {
                tracing::error!(
                    call_id,
                    current = ?current,
                    attempted = ?decision,
                    "conflicting terminal decision ignored"
                );
            }
            None => {
                tracing::error!(call_id, "decision recorded for unregistered call");
            }
        }
    }

    pub fn decision(&self, call_id: &str) -> Option<CallDecision> {
        self.decisions.get(call_id).copied()
    }

    /// 尚无终态判定的调用（轮次完成前必须为空）
    pub fn unresolved(&self) -> Vec<String> {
        self.decisions
            .iter()
            .filter_map(|(id, d)| (!d.is_terminal()).then(|| id.clone()))
            .collect()
    }

    /// 能力失败计数 +1（规划器重提的重试上限依据）
    pub fn record_failure(&mut self, capability: &str) -> u32 {
        let count = self.failure_counts.entry(capability.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn failures(&self, capability: &str) -> u32 {
        self.failure_counts.get(capability).copied().unwrap_or(0)
    }
}

impl Default for Turn {
    fn default() -> Self {
        Self::new()
    }
}
