//! 上下文治理：条目裁剪与滑窗压缩
//!
//! 每次规划器调用前两趟独立处理：
//! 1. 条目裁剪：陈旧的超大 ToolResult 原位替换为截断标记，不改变长度与顺序；
//! 2. 滑窗压缩：长度超出 max_messages 时，保住首个 User/Planner 对与最近 tail_size 条，
//!    将中段经 summarize 能力归并为单条 SystemNote；摘要失败降级为硬截断（记日志，不致命）。
//! 压缩幂等：长度已达标即 no-op。

use crate::capability::CapabilityInvoker;
use crate::core::AgentError;
use crate::transcript::{CallOutcome, Transcript, TranscriptEntry};

/// 压缩摘要输入的上限字符数
const SUMMARY_INPUT_MAX_CHARS: usize = 16_000;

/// 预算：轮次内只读，构造时注入（无全局可变状态）
#[derive(Debug, Clone)]
pub struct Budget {
    /// 治理后转写的条目数上限
    pub max_messages: usize,
    /// 单条 ToolResult 负载字节上限
    pub max_bytes_per_entry: usize,
    /// 压缩时保留的尾部条目数
    pub tail_size: usize,
    /// 裁剪豁免的最近条目数
    pub keep_recent_results: usize,
    /// 截断标记保留的前缀字节数
    pub preview_bytes: usize,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            max_messages: 40,
            max_bytes_per_entry: 4096,
            tail_size: 8,
            keep_recent_results: 4,
            preview_bytes: 512,
        }
    }
}

impl Budget {
    /// 启动期校验：首对 + 摘要 + 尾部必须能装进 max_messages
    pub fn validated(self) -> Result<Self, AgentError> {
        if self.max_messages < self.tail_size + 4 {
            return Err(AgentError::ConfigError(format!(
                "budget: max_messages ({}) must be at least tail_size + 4 ({})",
                self.max_messages,
                self.tail_size + 4
            )));
        }
        if self.preview_bytes > self.max_bytes_per_entry {
            return Err(AgentError::ConfigError(
                "budget: preview_bytes exceeds max_bytes_per_entry".to_string(),
            ));
        }
        Ok(self)
    }
}

/// 一次治理的动作记录（事件与测试用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionMode {
    /// 未触发
    None,
    /// 中段归并为摘要注记
    Summarized { replaced: usize },
    /// 摘要失败，硬截断了中段最旧条目
    HardTruncated { dropped: usize },
}

#[derive(Debug, Clone)]
pub struct GovernReport {
    pub trimmed_entries: usize,
    pub compaction: CompactionMode,
}

/// 上下文治理器
pub struct ContextGovernor {
    budget: Budget,
}

impl ContextGovernor {
    pub fn new(budget: Budget) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    /// 两趟治理：裁剪 + 压缩
    pub async fn govern(
        &self,
        transcript: &mut Transcript,
        invoker: &CapabilityInvoker,
    ) -> GovernReport {
        let trimmed_entries = self.trim_entries(transcript);
        let compaction = self.compact(transcript, invoker).await;
        GovernReport {
            trimmed_entries,
            compaction,
        }
    }

    /// 第一趟：陈旧超大 ToolResult 原位截断。有损但局部，长度与顺序不变。
    pub fn trim_entries(&self, transcript: &mut Transcript) -> usize {
        let len = transcript.len();
        let protected_from = len.saturating_sub(self.budget.keep_recent_results);
        let max_bytes = self.budget.max_bytes_per_entry;
        let preview_bytes = self.budget.preview_bytes;

        let mut trimmed = 0;
        for entry in transcript.entries_mut()[..protected_from].iter_mut() {
            if entry.payload_bytes() <= max_bytes {
                continue;
            }
            let TranscriptEntry::ToolResult { result } = entry else {
                continue;
            };
            let payload = match &mut result.outcome {
                CallOutcome::Success { payload } => payload,
                CallOutcome::Failure { message, .. } => message,
                CallOutcome::Denied => continue,
            };
            let dropped = payload.len() - preview_bytes.min(payload.len());
            let prefix = truncate_at_char_boundary(payload, preview_bytes);
            *payload = format!("{}… [trimmed {} bytes]", prefix, dropped);
            trimmed += 1;
        }
        if trimmed > 0 {
            tracing::debug!(trimmed, "transcript entries trimmed in place");
        }
        trimmed
    }

    /// 第二趟：滑窗压缩。长度达标时 no-op（幂等）。
    pub async fn compact(
        &self,
        transcript: &mut Transcript,
        invoker: &CapabilityInvoker,
    ) -> CompactionMode {
        let len = transcript.len();
        if len <= self.budget.max_messages {
            return CompactionMode::None;
        }

        let head_end = transcript.first_exchange_end();
        let tail_start = len - self.budget.tail_size;
        if tail_start <= head_end + 1 {
            // 中段不足两条，压缩无意义；预算校验保证正常配置不会到这里
            return CompactionMode::None;
        }
        let range = head_end..tail_start;
        let range_len = range.len();

        let mut excerpt = String::new();
        for entry in &transcript.entries()[range.clone()] {
            excerpt.push_str(&entry.render_line());
            excerpt.push('\n');
            if excerpt.len() >= SUMMARY_INPUT_MAX_CHARS {
                break;
            }
        }

        // 摘要本身是一次能力调用，共享统一失败策略
        match invoker
            .invoke("summarize", serde_json::json!({ "text": excerpt }))
            .await
        {
            Ok(summary) => {
                let note = format!(
                    "Earlier conversation ({} entries) compacted:\n{}",
                    range_len,
                    summary.trim()
                );
                transcript.replace_range(range, TranscriptEntry::note(note));
                CompactionMode::Summarized { replaced: range_len }
            }
            Err(e) => {
                // 降级：丢弃中段最旧条目直到达标，不留注记。可用性优先于摘要质量。
                tracing::warn!(error = %e, "summarization failed, hard-truncating transcript");
                let needed = len - self.budget.max_messages;
                let dropped = needed.min(range_len);
                transcript.drain_range(head_end..head_end + dropped);
                CompactionMode::HardTruncated { dropped }
            }
        }
    }
}

/// 字节上限内最长的字符边界前缀
fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
