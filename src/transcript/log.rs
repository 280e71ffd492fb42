//! 追加式转写
//!
//! 仅尾部追加；压缩可以用单条 SystemNote 替换连续中段，但永不重排、永不复制，
//! 且会话首个 UserMessage/PlannerMessage 对永不淘汰。写入只经 Turn Orchestrator（单写者）。

use std::ops::Range;

use crate::transcript::{CallOutcome, Message, TranscriptEntry};

/// 转写：条目有序追加，压缩与裁剪由 Context Governor 驱动
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [TranscriptEntry] {
        &mut self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 恢复快照（持久化加载）
    pub fn set_entries(&mut self, entries: Vec<TranscriptEntry>) {
        self.entries = entries;
    }

    /// 会话首个 User/Planner 消息对的结束下标（此前的条目永不淘汰）。
    /// 尚无规划器回复时只保护首条用户消息。
    pub fn first_exchange_end(&self) -> usize {
        let Some(user_idx) = self
            .entries
            .iter()
            .position(|e| matches!(e, TranscriptEntry::UserMessage { .. }))
        else {
            return 0;
        };
        match self.entries[user_idx + 1..]
            .iter()
            .position(|e| matches!(e, TranscriptEntry::PlannerMessage { .. }))
        {
            Some(rel) => user_idx + 1 + rel + 1,
            None => user_idx + 1,
        }
    }

    /// 用单条目替换连续范围（压缩）；范围外条目顺序不变
    pub fn replace_range(&mut self, range: Range<usize>, entry: TranscriptEntry) {
        self.entries.splice(range, std::iter::once(entry));
    }

    /// 丢弃连续范围（压缩摘要失败时的硬截断）
    pub fn drain_range(&mut self, range: Range<usize>) {
        self.entries.drain(range);
    }

    /// 转换为规划器消息序列。
    /// ToolResult 以 user 角色携带 Observation JSON（call_id 在内，乱序完成可对应）；
    /// SystemNote（压缩摘要等）以 system 角色注入。
    pub fn to_messages(&self) -> Vec<Message> {
        self.entries
            .iter()
            .map(|e| match e {
                TranscriptEntry::UserMessage { content } => Message::user(content.clone()),
                TranscriptEntry::PlannerMessage { content } => Message::assistant(content.clone()),
                TranscriptEntry::SystemNote { content } => Message::system(content.clone()),
                TranscriptEntry::ToolResult { result } => {
                    let rendered = serde_json::to_string(result)
                        .unwrap_or_else(|_| format!("{:?}", result));
                    Message::user(format!("Observation: {}", rendered))
                }
            })
            .collect()
    }

    /// 某 call_id 的结果条目（测试与去重查询用）
    pub fn result_for(&self, call_id: &str) -> Option<&CallOutcome> {
        self.entries.iter().find_map(|e| match e {
            TranscriptEntry::ToolResult { result } if result.call_id == call_id => {
                Some(&result.outcome)
            }
            _ => None,
        })
    }
}
