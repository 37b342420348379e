//! 全文检索：消息与洞察两路 FTS5 查询，合并为一个结果流
//!
//! 每路各自按 bm25 排名（最相关在前）取至多 limit 条，再按 [`MergeStrategy`] 合并后截断到 limit。
//! 默认的 Concatenate 是「消息在前、洞察在后」直接拼接：两路都很丰富时，最终 limit 条
//! 并不是跨来源最相关的 limit 条，会偏向消息。需要跨来源交织时改用 ReciprocalRankFusion。
//!
//! 查询串直接交给 FTS5 解析，语法错误返回 [`MemoryError::QuerySyntax`]；
//! 处理任意用户输入前可先用 [`escape_query`] 转义。

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::Serialize;

use super::conversation::Role;
use super::insights::InsightKind;
use super::schema::Database;
use super::validate_limit;
use crate::config::MergeStrategy;
use crate::core::{time, MemoryError, Result};

/// RRF 常数
const RRF_K: f64 = 60.0;

/// FTS5 snippet() 允许的最大词数
const MAX_SNIPPET_TOKENS: u32 = 64;

/// 命中来源
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum HitSource {
    Message { conversation_id: i64, message_id: i64 },
    Insight { insight_id: i64, kind: InsightKind },
}

/// 统一检索结果
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchHit {
    pub source: HitSource,
    /// 消息：所属会话标题；洞察：如 "Goal Insight"
    pub title: String,
    pub snippet: String,
    pub timestamp: DateTime<Utc>,
    /// bm25 分数（越小越相关），仅在同一来源内可比
    pub rank: f64,
}

/// 会话内检索结果
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConversationMatch {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

pub struct SearchEngine<'a> {
    db: &'a Database,
    merge: MergeStrategy,
    snippet_tokens: u32,
    default_limit: i64,
}

impl<'a> SearchEngine<'a> {
    pub fn new(
        db: &'a Database,
        merge: MergeStrategy,
        snippet_tokens: u32,
        default_limit: i64,
    ) -> Self {
        Self {
            db,
            merge,
            snippet_tokens: snippet_tokens.clamp(1, MAX_SNIPPET_TOKENS),
            default_limit,
        }
    }

    /// 跨消息与洞察检索，最多返回 limit 条（None 用配置默认值）
    pub fn search_all(&self, query: &str, limit: Option<i64>) -> Result<Vec<SearchHit>> {
        let limit = validate_limit(limit.unwrap_or(self.default_limit))?;
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        // 列过滤只对有该列的来源有效（如 tags: 只存在于洞察索引），缺列的一路按零命中处理；
        // 两路都拒绝或出现真正的解析错误时才返回 QuerySyntax
        let (messages, insights) = self.db.read(|conn| {
            let messages = self.search_messages(conn, query, limit).map_err(classify);
            let insights = self.search_insights(conn, query, limit).map_err(classify);
            match (messages, insights) {
                (Ok(m), Ok(i)) => Ok((m, i)),
                (Err(err), Ok(i)) if is_unknown_column(&err) => Ok((Vec::new(), i)),
                (Ok(m), Err(err)) if is_unknown_column(&err) => Ok((m, Vec::new())),
                (Err(err), _) | (_, Err(err)) => Err(err),
            }
        })?;
        tracing::debug!(
            query,
            message_hits = messages.len(),
            insight_hits = insights.len(),
            "search_all"
        );

        let mut merged = match self.merge {
            MergeStrategy::Concatenate => {
                let mut all = messages;
                all.extend(insights);
                all
            }
            MergeStrategy::ReciprocalRankFusion => fuse(messages, insights),
        };
        merged.truncate(limit as usize);
        Ok(merged)
    }

    /// 只在一个会话的消息里检索，按相关度排序，不截断
    pub fn search_within_conversation(
        &self,
        conversation_id: i64,
        query: &str,
    ) -> Result<Vec<ConversationMatch>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        self.db.read(|conn| {
            let run = || -> rusqlite::Result<Vec<ConversationMatch>> {
                let mut stmt = conn.prepare(
                    "SELECT m.role, m.content, m.created_at
                     FROM messages_fts
                     JOIN messages m ON m.id = messages_fts.rowid
                     WHERE messages_fts MATCH ?1 AND m.conversation_id = ?2
                     ORDER BY bm25(messages_fts), m.id",
                )?;
                let rows = stmt.query_map(params![query, conversation_id], |row| {
                    let role: String = row.get(0)?;
                    Ok(ConversationMatch {
                        role: role.parse().map_err(|err: MemoryError| {
                            rusqlite::Error::FromSqlConversionFailure(
                                0,
                                rusqlite::types::Type::Text,
                                Box::new(err),
                            )
                        })?,
                        content: row.get(1)?,
                        timestamp: time::column(row, 2)?,
                    })
                })?;
                rows.collect()
            };
            run().map_err(classify)
        })
    }

    fn search_messages(
        &self,
        conn: &Connection,
        query: &str,
        limit: i64,
    ) -> rusqlite::Result<Vec<SearchHit>> {
        let mut stmt = conn.prepare(
            "SELECT m.id, m.conversation_id, c.title,
                    snippet(messages_fts, 0, '', '', '...', ?3),
                    m.created_at, bm25(messages_fts)
             FROM messages_fts
             JOIN messages m ON m.id = messages_fts.rowid
             JOIN conversations c ON c.id = m.conversation_id
             WHERE messages_fts MATCH ?1
             ORDER BY bm25(messages_fts), m.id
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![query, limit, self.snippet_tokens], message_hit)?;
        rows.collect()
    }

    fn search_insights(
        &self,
        conn: &Connection,
        query: &str,
        limit: i64,
    ) -> rusqlite::Result<Vec<SearchHit>> {
        let mut stmt = conn.prepare(
            "SELECT i.id, i.type,
                    snippet(insights_fts, 0, '', '', '...', ?3),
                    i.created_at, bm25(insights_fts)
             FROM insights_fts
             JOIN insights i ON i.id = insights_fts.rowid
             WHERE insights_fts MATCH ?1
             ORDER BY bm25(insights_fts), i.id
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![query, limit, self.snippet_tokens], insight_hit)?;
        rows.collect()
    }
}

fn message_hit(row: &Row<'_>) -> rusqlite::Result<SearchHit> {
    Ok(SearchHit {
        source: HitSource::Message {
            message_id: row.get(0)?,
            conversation_id: row.get(1)?,
        },
        title: row.get(2)?,
        snippet: row.get(3)?,
        timestamp: time::column(row, 4)?,
        rank: row.get(5)?,
    })
}

fn insight_hit(row: &Row<'_>) -> rusqlite::Result<SearchHit> {
    let kind: String = row.get(1)?;
    let kind: InsightKind = kind.parse().map_err(|err: MemoryError| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(err))
    })?;
    Ok(SearchHit {
        source: HitSource::Insight {
            insight_id: row.get(0)?,
            kind,
        },
        title: kind.label(),
        snippet: row.get(2)?,
        timestamp: time::column(row, 3)?,
        rank: row.get(4)?,
    })
}

/// 倒数排名融合：score = Σ 1 / (k + 名次)；两路互不重叠，分数相同时消息在前
fn fuse(messages: Vec<SearchHit>, insights: Vec<SearchHit>) -> Vec<SearchHit> {
    let rrf = |position: usize| 1.0 / (RRF_K + position as f64 + 1.0);
    let mut scored: Vec<(f64, SearchHit)> = messages
        .into_iter()
        .enumerate()
        .map(|(pos, hit)| (rrf(pos), hit))
        .chain(insights.into_iter().enumerate().map(|(pos, hit)| (rrf(pos), hit)))
        .collect();
    // sort_by 是稳定排序，同分保留「消息在前」的原始顺序
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().map(|(_, hit)| hit).collect()
}

/// 把 FTS5 的解析错误归为 QuerySyntax，其余保持 Storage
fn classify(err: rusqlite::Error) -> MemoryError {
    if let rusqlite::Error::SqliteFailure(_, Some(msg)) = &err {
        let is_query_error = msg.starts_with("fts5:")
            || msg.contains("unterminated string")
            || msg.starts_with("no such column")
            || msg.starts_with("unknown special query");
        if is_query_error {
            return MemoryError::QuerySyntax(msg.clone());
        }
    }
    MemoryError::Storage(err)
}

/// 查询引用了该来源索引里不存在的列（如对消息索引用 tags:）
fn is_unknown_column(err: &MemoryError) -> bool {
    matches!(err, MemoryError::QuerySyntax(msg) if msg.starts_with("no such column"))
}

/// 把任意文本转成安全的 FTS5 查询：每个空白分隔的词加双引号（内部引号加倍），词之间为隐式 AND
pub fn escape_query(text: &str) -> String {
    text.split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActivePolicy;
    use crate::memory::conversation::ConversationLog;
    use crate::memory::insights::InsightStore;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> Database {
        let db = Database::new(dir.path().join("memory.db"), Duration::from_secs(1));
        db.init().unwrap();
        db
    }

    fn engine(db: &Database, merge: MergeStrategy) -> SearchEngine<'_> {
        SearchEngine::new(db, merge, 32, 10)
    }

    #[test]
    fn test_escape_query() {
        assert_eq!(escape_query("what's the status?"), "\"what's\" \"the\" \"status?\"");
        assert_eq!(escape_query("say \"hi\""), "\"say\" \"\"\"hi\"\"\"");
        assert_eq!(escape_query("   "), "");
    }

    #[test]
    fn test_message_hit_carries_title_and_timestamp() {
        let dir = TempDir::new().unwrap();
        let db = setup(&dir);
        let log = ConversationLog::new(&db, ActivePolicy::Advisory, 10);
        let cid = log.start("Finance sync", &[]).unwrap();
        let msg = log.append_message(cid, Role::User, "quarterly report").unwrap();

        let hits = engine(&db, MergeStrategy::Concatenate).search_all("quarterly", Some(5)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Finance sync");
        assert_eq!(hits[0].snippet, "quarterly report");
        assert_eq!(hits[0].timestamp, msg.created_at);
        assert_eq!(
            hits[0].source,
            HitSource::Message { conversation_id: cid, message_id: msg.id }
        );
    }

    #[test]
    fn test_insight_tags_are_searchable() {
        let dir = TempDir::new().unwrap();
        let db = setup(&dir);
        let insight = InsightStore::new(&db)
            .add(InsightKind::Decision, "use sqlite for storage", &["architecture"])
            .unwrap();

        let hits = engine(&db, MergeStrategy::Concatenate).search_all("architecture", None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Decision Insight");
        assert_eq!(hits[0].snippet, "use sqlite for storage");
        assert_eq!(hits[0].timestamp, insight.created_at);
    }

    #[test]
    fn test_concatenate_puts_messages_first_and_truncates() {
        let dir = TempDir::new().unwrap();
        let db = setup(&dir);
        let log = ConversationLog::new(&db, ActivePolicy::Advisory, 10);
        let insights = InsightStore::new(&db);
        let cid = log.start("deploys", &[]).unwrap();
        for i in 0..3 {
            log.append_message(cid, Role::User, &format!("deploy number {i}")).unwrap();
            insights.add(InsightKind::Pattern, &format!("deploy habit {i}"), &[]).unwrap();
        }

        let hits = engine(&db, MergeStrategy::Concatenate).search_all("deploy", Some(4)).unwrap();
        assert_eq!(hits.len(), 4);
        assert!(hits[..3].iter().all(|h| matches!(h.source, HitSource::Message { .. })));
        assert!(matches!(hits[3].source, HitSource::Insight { .. }));
    }

    #[test]
    fn test_rrf_interleaves_sources() {
        let dir = TempDir::new().unwrap();
        let db = setup(&dir);
        let log = ConversationLog::new(&db, ActivePolicy::Advisory, 10);
        let insights = InsightStore::new(&db);
        let cid = log.start("deploys", &[]).unwrap();
        for i in 0..3 {
            log.append_message(cid, Role::User, &format!("deploy number {i}")).unwrap();
            insights.add(InsightKind::Pattern, &format!("deploy habit {i}"), &[]).unwrap();
        }

        let hits = engine(&db, MergeStrategy::ReciprocalRankFusion)
            .search_all("deploy", Some(4))
            .unwrap();
        let kinds: Vec<bool> = hits
            .iter()
            .map(|h| matches!(h.source, HitSource::Message { .. }))
            .collect();
        assert_eq!(kinds, vec![true, false, true, false]);
    }

    #[test]
    fn test_limits_and_blank_query() {
        let dir = TempDir::new().unwrap();
        let db = setup(&dir);
        let search = engine(&db, MergeStrategy::Concatenate);
        assert!(search.search_all("anything", Some(0)).unwrap().is_empty());
        assert!(search.search_all("   ", Some(5)).unwrap().is_empty());
        assert!(matches!(search.search_all("x", Some(-1)), Err(MemoryError::Validation(_))));
    }

    #[test]
    fn test_invalid_query_is_syntax_error() {
        let dir = TempDir::new().unwrap();
        let db = setup(&dir);
        let log = ConversationLog::new(&db, ActivePolicy::Advisory, 10);
        let cid = log.start("t", &[]).unwrap();
        log.append_message(cid, Role::User, "hello world").unwrap();
        let search = engine(&db, MergeStrategy::Concatenate);

        for bad in ["\"unbalanced", "hello AND", "(hello", "nosuchcol:hello"] {
            let err = search.search_all(bad, Some(5)).unwrap_err();
            assert!(matches!(err, MemoryError::QuerySyntax(_)), "{bad}: {err}");
        }
        let err = search.search_within_conversation(cid, "\"oops").unwrap_err();
        assert!(matches!(err, MemoryError::QuerySyntax(_)));

        // 转义后可安全检索
        let hits = search.search_all(&escape_query("hello AND"), Some(5)).unwrap();
        assert!(hits.is_empty());
        let hits = search.search_all(&escape_query("hello"), Some(5)).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_column_filter_applies_to_the_source_that_has_it() {
        let dir = TempDir::new().unwrap();
        let db = setup(&dir);
        let log = ConversationLog::new(&db, ActivePolicy::Advisory, 10);
        let cid = log.start("standup", &[]).unwrap();
        log.append_message(cid, Role::User, "work is piling up").unwrap();
        let insight = InsightStore::new(&db)
            .add(InsightKind::Goal, "clear the backlog", &["work"])
            .unwrap();
        let search = engine(&db, MergeStrategy::Concatenate);

        let hits = search.search_all("tags:work", Some(5)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(
            hits[0].source,
            HitSource::Insight { insight_id: insight.id, kind: InsightKind::Goal }
        );

        // 两路都没有的列仍是语法错误
        let err = search.search_all("nosuchcol:x", Some(5)).unwrap_err();
        assert!(matches!(err, MemoryError::QuerySyntax(_)));
        // 真正的解析错误不会被吞掉
        let err = search.search_all("tags:\"work", Some(5)).unwrap_err();
        assert!(matches!(err, MemoryError::QuerySyntax(_)));
    }

    #[test]
    fn test_search_within_conversation_is_scoped() {
        let dir = TempDir::new().unwrap();
        let db = setup(&dir);
        let log = ConversationLog::new(&db, ActivePolicy::Advisory, 10);
        let a = log.start("a", &[]).unwrap();
        let b = log.start("b", &[]).unwrap();
        log.append_message(a, Role::User, "budget for travel").unwrap();
        log.append_message(a, Role::Assistant, "the budget is approved").unwrap();
        log.append_message(b, Role::User, "budget elsewhere").unwrap();

        let matches = engine(&db, MergeStrategy::Concatenate)
            .search_within_conversation(a, "budget")
            .unwrap();
        assert_eq!(matches.len(), 2);
        let mut roles: Vec<Role> = matches.iter().map(|m| m.role).collect();
        roles.sort_by_key(|r| r.as_str());
        assert_eq!(roles, vec![Role::Assistant, Role::User]);
        assert!(matches.iter().all(|m| m.content.contains("budget")));

        assert!(engine(&db, MergeStrategy::Concatenate)
            .search_within_conversation(999, "budget")
            .unwrap()
            .is_empty());
    }
}
