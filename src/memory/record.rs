//! 记忆记录
//!
//! 跨会话持久的短事实。id 单调且永不复用；替换保留 id 与 created_at，
//! 只新增 updated_at 与新内容：是更新，不是删除再新建。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 单条记忆记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: i64,
    pub content: String,
    /// 规范化标签（小写、去重、有序）；冲突检测按标签重叠圈定同类记录
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub source: String,
}

impl MemoryRecord {
    /// 新近度：最近一次创建或更新时间（recall 按此倒序）
    pub fn recency(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }

    /// 与给定标签集是否至少共享一个标签
    pub fn shares_tag(&self, tags: &[String]) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }

    /// 内容或标签是否命中查询（大小写不敏感）
    pub fn matches(&self, query_lower: &str) -> bool {
        self.content.to_lowercase().contains(query_lower)
            || self.tags.iter().any(|t| t.contains(query_lower))
    }
}

/// 标签规范化：小写、去空白、去重、排序
pub fn normalize_tags(tags: impl IntoIterator<Item = impl Into<String>>) -> Vec<String> {
    let mut out: Vec<String> = tags
        .into_iter()
        .map(|t| t.into().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tags() {
        let tags = normalize_tags(vec!["Style", "  python ", "style", ""]);
        assert_eq!(tags, vec!["python", "style"]);
    }

    #[test]
    fn test_recency_prefers_updated_at() {
        let created = Utc::now();
        let updated = created + chrono::Duration::seconds(60);
        let mut record = MemoryRecord {
            id: 1,
            content: "x".into(),
            tags: vec![],
            created_at: created,
            updated_at: None,
            source: "agent".into(),
        };
        assert_eq!(record.recency(), created);
        record.updated_at = Some(updated);
        assert_eq!(record.recency(), updated);
    }
}
