//! 长期记忆接口：Agent 运行时只需 add(text) 与 search(query, k)
//!
//! [`StoreLongTerm`] 把文本写成洞察、检索走 [`SearchEngine::search_all`](super::search::SearchEngine::search_all)。
//! 该接口没有错误通道，失败只记 warn 日志并返回空结果。

use std::sync::Arc;

use super::insights::InsightKind;
use super::search::escape_query;
use super::store::MemoryStore;

/// 长期记忆 trait：支持写入与相关度检索
pub trait LongTermMemory: Send + Sync {
    /// 存入一段文本（可后续按 query 检索）
    fn add(&self, text: &str);

    /// 按查询检索最相关的 k 条，返回文本片段
    fn search(&self, query: &str, k: usize) -> Vec<String>;

    /// 是否启用（Noop 实现返回 false）
    fn enabled(&self) -> bool {
        true
    }
}

/// 空实现：未启用长期记忆时使用
#[derive(Clone, Default)]
pub struct NoopLongTerm;

impl LongTermMemory for NoopLongTerm {
    fn add(&self, _text: &str) {}

    fn search(&self, _query: &str, _k: usize) -> Vec<String> {
        Vec::new()
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// 基于记忆库的实现：add 写入指定类型的洞察，search 对用户文本转义后全库检索
#[derive(Clone)]
pub struct StoreLongTerm {
    store: Arc<MemoryStore>,
    kind: InsightKind,
}

impl StoreLongTerm {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            kind: InsightKind::Context,
        }
    }

    /// 写入时使用的洞察类型（默认 context）
    pub fn with_kind(mut self, kind: InsightKind) -> Self {
        self.kind = kind;
        self
    }
}

impl LongTermMemory for StoreLongTerm {
    fn add(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if let Err(err) = self.store.insights().add(self.kind, text, &[]) {
            tracing::warn!(error = %err, "long-term add failed");
        }
    }

    fn search(&self, query: &str, k: usize) -> Vec<String> {
        let limit = i64::try_from(k).unwrap_or(i64::MAX);
        match self.store.search().search_all(&escape_query(query), Some(limit)) {
            Ok(hits) => hits.into_iter().map(|hit| hit.snippet).collect(),
            Err(err) => {
                tracing::warn!(error = %err, "long-term search failed");
                Vec::new()
            }
        }
    }
}
