//! 记忆生命周期管理
//!
//! 唯一写入口 propose：无同类记录则 Create；与同类记录语义矛盾则返回 ReplaceProposal，
//! 经外部审批后才经 apply_replace 落盘；输入不合法则 Reject。
//! 冲突判定走专门的推理调用（LLM），不可用时降级为 append-only：生命周期特性优雅退化，
//! 绝不阻塞保存。recall 只读、无需审批。

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use crate::approval::{ApprovalGate, Decision};
use crate::core::AgentError;
use crate::memory::record::normalize_tags;
use crate::memory::{MemoryRecord, RecordStore};
use crate::planner::PlannerClient;
use crate::transcript::Message;

/// 记录内容上限（短事实，不是文档库）
const MAX_CONTENT_CHARS: usize = 1000;

/// 记录来源标注
const DEFAULT_SOURCE: &str = "agent";

/// propose 的产出
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// 无同类记录，已直接落盘
    Create(MemoryRecord),
    /// 检测到矛盾；存储未动，待外部审批
    ReplaceProposal {
        existing_id: i64,
        old_content: String,
        new_content: String,
    },
    /// 输入不合法
    Reject { reason: String },
}

/// save 驱动完整状态机后的终态报告
/// Proposed → {Created | PendingReplace → {Replaced | RejectedKeepBoth}}
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SaveReport {
    Created { id: i64 },
    Replaced { id: i64 },
    /// 替换被拒不是错误：新旧两条并存
    KeptBoth { existing_id: i64, new_id: i64 },
    Rejected { reason: String },
}

/// 语义矛盾判定：返回矛盾记录 id（None 表示不矛盾）
#[async_trait]
pub trait ConflictJudge: Send + Sync {
    async fn judge(
        &self,
        new_content: &str,
        candidates: &[MemoryRecord],
    ) -> Result<Option<i64>, String>;
}

/// append-only 降级：永不判矛盾
pub struct NoConflictJudge;

#[async_trait]
impl ConflictJudge for NoConflictJudge {
    async fn judge(
        &self,
        _new_content: &str,
        _candidates: &[MemoryRecord],
    ) -> Result<Option<i64>, String> {
        Ok(None)
    }
}

/// 经规划器客户端做语义矛盾判定
pub struct PlannerConflictJudge {
    client: Arc<dyn PlannerClient>,
}

impl PlannerConflictJudge {
    pub fn new(client: Arc<dyn PlannerClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConflictJudge for PlannerConflictJudge {
    async fn judge(
        &self,
        new_content: &str,
        candidates: &[MemoryRecord],
    ) -> Result<Option<i64>, String> {
        let mut listing = String::new();
        for record in candidates {
            listing.push_str(&format!("- id {}: {}\n", record.id, record.content));
        }
        let messages = vec![
            Message::system(
                "You compare a new fact against existing facts. Semantic contradiction only; \
                 wording differences are not contradictions. Reply with exactly one JSON object: \
                 {\"contradicts\": true|false, \"id\": <id of the contradicted fact or null>}",
            ),
            Message::user(format!(
                "Existing facts:\n{}\nNew fact: {}",
                listing, new_content
            )),
        ];
        let reply = self.client.complete(&messages).await?;

        let start = reply.find('{').ok_or("no JSON in judge reply")?;
        let end = reply.rfind('}').ok_or("no JSON in judge reply")?;
        let parsed: serde_json::Value =
            serde_json::from_str(&reply[start..=end]).map_err(|e| e.to_string())?;
        if parsed
            .get("contradicts")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            Ok(parsed.get("id").and_then(|v| v.as_i64()))
        } else {
            Ok(None)
        }
    }
}

/// 替换审批：PendingReplace 的外部裁决面
#[async_trait]
pub trait ReplaceApprover: Send + Sync {
    async fn approve_replace(&self, existing: &MemoryRecord, new_content: &str) -> Decision;
}

/// 固定裁决（测试与全量放行模式）
pub struct FixedApprover(pub Decision);

#[async_trait]
impl ReplaceApprover for FixedApprover {
    async fn approve_replace(&self, _existing: &MemoryRecord, _new_content: &str) -> Decision {
        self.0
    }
}

/// 经审批门裁决：替换请求与能力调用共用同一审批面
pub struct GateReplaceApprover {
    gate: Arc<ApprovalGate>,
}

impl GateReplaceApprover {
    pub fn new(gate: Arc<ApprovalGate>) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl ReplaceApprover for GateReplaceApprover {
    async fn approve_replace(&self, existing: &MemoryRecord, new_content: &str) -> Decision {
        if self.gate.auto_approve() {
            return Decision::Approved;
        }
        let summary = format!(
            "memory replace id {}: \"{}\" -> \"{}\"",
            existing.id, existing.content, new_content
        );
        let handle = self
            .gate
            .submit_for_approval(format!("mem-{}", existing.id), "memory_replace", summary);
        handle.decided().await
    }
}

/// 记忆生命周期管理器：记录的唯一属主，编排层只经操作接口访问
pub struct MemoryLifecycle {
    store: Arc<dyn RecordStore>,
    /// 内存镜像（启动时从 store 载入；单写者）
    records: Mutex<Vec<MemoryRecord>>,
    /// 单调 id 发号器；替换保 id，id 永不复用
    next_id: AtomicI64,
    judge: Arc<dyn ConflictJudge>,
}

impl MemoryLifecycle {
    pub fn new(store: Arc<dyn RecordStore>, judge: Arc<dyn ConflictJudge>) -> anyhow::Result<Self> {
        let records = store.load_records()?;
        let next_id = records.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        Ok(Self {
            store,
            records: Mutex::new(records),
            next_id: AtomicI64::new(next_id),
            judge,
        })
    }

    /// 唯一写入口。Create 直接落盘；ReplaceProposal 不动存储，等外部审批。
    pub async fn propose(
        &self,
        content: &str,
        tags: Vec<String>,
    ) -> Result<LifecycleOutcome, AgentError> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(LifecycleOutcome::Reject {
                reason: "empty content".to_string(),
            });
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Ok(LifecycleOutcome::Reject {
                reason: format!("content exceeds {} chars", MAX_CONTENT_CHARS),
            });
        }
        let tags = normalize_tags(tags);

        // 同类 = 至少共享一个标签（圈定范围是可调策略，不是固定算法）
        let candidates: Vec<MemoryRecord> = {
            let records = self.records.lock().unwrap();
            records
                .iter()
                .filter(|r| r.shares_tag(&tags))
                .cloned()
                .collect()
        };

        if !candidates.is_empty() {
            match self.judge.judge(content, &candidates).await {
                Ok(Some(id)) => {
                    if let Some(existing) = candidates.iter().find(|r| r.id == id) {
                        return Ok(LifecycleOutcome::ReplaceProposal {
                            existing_id: existing.id,
                            old_content: existing.content.clone(),
                            new_content: content.to_string(),
                        });
                    }
                    // 判定返回了不在候选内的 id：当作无矛盾
                    tracing::warn!(id, "conflict judge named a non-candidate record");
                }
                Ok(None) => {}
                Err(e) => {
                    // 推理不可用 → append-only 降级，保存永不被阻塞
                    tracing::warn!(error = %e, "conflict reasoning unavailable, falling back to append-only");
                }
            }
        }

        let record = self.insert(content, tags)?;
        Ok(LifecycleOutcome::Create(record))
    }

    /// 仅在外部审批通过后调用：保 id 与 created_at，置 updated_at，覆盖内容。
    /// 这是既有记录的唯一变更路径；先落盘后改镜像，全有或全无。
    pub async fn apply_replace(
        &self,
        id: i64,
        new_content: &str,
    ) -> Result<MemoryRecord, AgentError> {
        let updated_at = Utc::now();
        self.store
            .update_record(id, new_content, updated_at)
            .map_err(|e| AgentError::StoreError(e.to_string()))?;

        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AgentError::StoreError(format!("record {} not in mirror", id)))?;
        record.content = new_content.to_string();
        record.updated_at = Some(updated_at);
        Ok(record.clone())
    }

    /// RejectedKeepBoth 路径：替换被拒后将新内容作为独立记录并存
    pub fn create_keep_both(
        &self,
        content: &str,
        tags: Vec<String>,
    ) -> Result<MemoryRecord, AgentError> {
        self.insert(content.trim(), normalize_tags(tags))
    }

    /// 驱动完整状态机：Proposed → {Created | PendingReplace → {Replaced | RejectedKeepBoth}}
    pub async fn save(
        &self,
        content: &str,
        tags: Vec<String>,
        approver: &dyn ReplaceApprover,
    ) -> Result<SaveReport, AgentError> {
        match self.propose(content, tags.clone()).await? {
            LifecycleOutcome::Create(record) => Ok(SaveReport::Created { id: record.id }),
            LifecycleOutcome::Reject { reason } => Ok(SaveReport::Rejected { reason }),
            LifecycleOutcome::ReplaceProposal {
                existing_id,
                new_content,
                ..
            } => {
                let existing = self
                    .get(existing_id)
                    .ok_or_else(|| AgentError::StoreError(format!("record {} vanished", existing_id)))?;
                match approver.approve_replace(&existing, &new_content).await {
                    Decision::Approved => {
                        let record = self.apply_replace(existing_id, &new_content).await?;
                        Ok(SaveReport::Replaced { id: record.id })
                    }
                    Decision::Denied => {
                        let record = self.create_keep_both(&new_content, tags)?;
                        Ok(SaveReport::KeptBoth {
                            existing_id,
                            new_id: record.id,
                        })
                    }
                }
            }
        }
    }

    /// 大小写不敏感检索（内容 + 标签），按新近度倒序；只读，无需审批
    pub fn recall(&self, query: &str) -> Vec<MemoryRecord> {
        let query_lower = query.trim().to_lowercase();
        let records = self.records.lock().unwrap();
        let mut hits: Vec<MemoryRecord> = records
            .iter()
            .filter(|r| query_lower.is_empty() || r.matches(&query_lower))
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.recency().cmp(&a.recency()));
        hits
    }

    pub fn get(&self, id: i64) -> Option<MemoryRecord> {
        self.records.lock().unwrap().iter().find(|r| r.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().unwrap().is_empty()
    }

    fn insert(&self, content: &str, tags: Vec<String>) -> Result<MemoryRecord, AgentError> {
        if content.is_empty() {
            return Err(AgentError::StoreError("empty content".to_string()));
        }
        let record = MemoryRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            content: content.to_string(),
            tags,
            created_at: Utc::now(),
            updated_at: None,
            source: DEFAULT_SOURCE.to_string(),
        };
        self.store
            .save_record(&record)
            .map_err(|e| AgentError::StoreError(e.to_string()))?;
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRecordStore;

    /// 固定判定：总是指认 target
    struct FixedJudge(Option<i64>);

    #[async_trait]
    impl ConflictJudge for FixedJudge {
        async fn judge(
            &self,
            _new: &str,
            _candidates: &[MemoryRecord],
        ) -> Result<Option<i64>, String> {
            Ok(self.0)
        }
    }

    /// 总是失败的判定（降级路径）
    struct BrokenJudge;

    #[async_trait]
    impl ConflictJudge for BrokenJudge {
        async fn judge(
            &self,
            _new: &str,
            _candidates: &[MemoryRecord],
        ) -> Result<Option<i64>, String> {
            Err("reasoning backend down".to_string())
        }
    }

    fn lifecycle(judge: Arc<dyn ConflictJudge>) -> MemoryLifecycle {
        MemoryLifecycle::new(Arc::new(InMemoryRecordStore::new()), judge).unwrap()
    }

    #[tokio::test]
    async fn test_create_when_no_related_record() {
        let m = lifecycle(Arc::new(FixedJudge(Some(1))));
        let outcome = m.propose("Prefer tabs", vec!["style".into()]).await.unwrap();
        match outcome {
            LifecycleOutcome::Create(r) => {
                assert_eq!(r.id, 1);
                assert!(r.updated_at.is_none());
            }
            other => panic!("expected Create, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reject_malformed_input() {
        let m = lifecycle(Arc::new(NoConflictJudge));
        let outcome = m.propose("   ", vec![]).await.unwrap();
        assert!(matches!(outcome, LifecycleOutcome::Reject { .. }));
    }

    #[tokio::test]
    async fn test_conflict_yields_replace_proposal_without_mutation() {
        let m = lifecycle(Arc::new(FixedJudge(Some(1))));
        m.propose("Prefer JavaScript", vec!["python".into(), "style".into()])
            .await
            .unwrap();

        let outcome = m
            .propose("Prefer TypeScript", vec!["python".into(), "style".into()])
            .await
            .unwrap();
        match outcome {
            LifecycleOutcome::ReplaceProposal {
                existing_id,
                old_content,
                new_content,
            } => {
                assert_eq!(existing_id, 1);
                assert_eq!(old_content, "Prefer JavaScript");
                assert_eq!(new_content, "Prefer TypeScript");
            }
            other => panic!("expected ReplaceProposal, got {:?}", other),
        }
        // 审批前存储不得变化
        assert_eq!(m.len(), 1);
        assert_eq!(m.get(1).unwrap().content, "Prefer JavaScript");
    }

    #[tokio::test]
    async fn test_judge_failure_degrades_to_append_only() {
        let m = lifecycle(Arc::new(BrokenJudge));
        m.propose("Prefer JavaScript", vec!["style".into()]).await.unwrap();
        let outcome = m.propose("Prefer TypeScript", vec!["style".into()]).await.unwrap();
        // 推理不可用 → 永不判矛盾，两条并存
        assert!(matches!(outcome, LifecycleOutcome::Create(_)));
        assert_eq!(m.len(), 2);
    }

    #[tokio::test]
    async fn test_replace_keeps_id_and_created_at() {
        let m = lifecycle(Arc::new(FixedJudge(Some(1))));
        m.propose("Prefer JavaScript", vec!["style".into()]).await.unwrap();
        let created_at = m.get(1).unwrap().created_at;

        let report = m
            .save(
                "Prefer TypeScript",
                vec!["style".into()],
                &FixedApprover(Decision::Approved),
            )
            .await
            .unwrap();
        assert!(matches!(report, SaveReport::Replaced { id: 1 }));

        let record = m.get(1).unwrap();
        assert_eq!(record.content, "Prefer TypeScript");
        assert_eq!(record.created_at, created_at);
        assert!(record.updated_at.is_some());
        assert_eq!(m.len(), 1);
    }

    #[tokio::test]
    async fn test_denied_replace_keeps_both() {
        let m = lifecycle(Arc::new(FixedJudge(Some(1))));
        m.propose("Prefer JavaScript", vec!["style".into()]).await.unwrap();

        let report = m
            .save(
                "Prefer TypeScript",
                vec!["style".into()],
                &FixedApprover(Decision::Denied),
            )
            .await
            .unwrap();
        match report {
            SaveReport::KeptBoth { existing_id, new_id } => {
                assert_eq!(existing_id, 1);
                assert_eq!(new_id, 2);
            }
            other => panic!("expected KeptBoth, got {:?}", other),
        }
        assert_eq!(m.get(1).unwrap().content, "Prefer JavaScript");

        let hits = m.recall("TypeScript");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 2);
    }

    #[tokio::test]
    async fn test_recall_orders_by_recency() {
        let m = lifecycle(Arc::new(NoConflictJudge));
        m.propose("fact one", vec!["a".into()]).await.unwrap();
        m.propose("fact two", vec!["b".into()]).await.unwrap();
        // 更新 id 1，使其新近度反超
        m.apply_replace(1, "fact one revised").await.unwrap();

        let hits = m.recall("fact");
        assert_eq!(hits[0].id, 1);
        assert_eq!(hits[1].id, 2);
    }
}
