//! 对话日志：会话的开始 / 结束、逐条追加消息、按时间回看
//!
//! 「活跃会话」默认只是约定：最近开始且未结束的那个（见 [`ActivePolicy`]）。
//! 结束后的会话仍可追加消息，结束只记录时间与摘要，不加锁。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::schema::Database;
use super::{tags, validate_limit};
use crate::config::ActivePolicy;
use crate::core::{time, MemoryError, Result};

/// 消息角色（固定枚举，落库为小写字符串）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(MemoryError::validation(format!(
                "role must be 'user' or 'assistant', got {other:?}"
            ))),
        }
    }
}

/// 会话状态：ended_at 为空即 Open
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversationState {
    Open,
    Closed,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Conversation {
    pub id: i64,
    pub title: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub tags: Vec<String>,
}

impl Conversation {
    pub fn state(&self) -> ConversationState {
        if self.ended_at.is_some() {
            ConversationState::Closed
        } else {
            ConversationState::Open
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            started_at: time::column(row, 2)?,
            ended_at: time::opt_column(row, 3)?,
            summary: row.get(4)?,
            tags: tags::decode(&row.get::<_, String>(5)?),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let role: String = row.get(2)?;
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            role: role.parse().map_err(|err: MemoryError| {
                rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(err))
            })?,
            content: row.get(3)?,
            created_at: time::column(row, 4)?,
        })
    }
}

/// get() 的返回：会话本身 + 按时间升序的全部消息
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Transcript {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

const CONVERSATION_COLUMNS: &str = "id, title, started_at, ended_at, summary, tags";

/// 对话日志
pub struct ConversationLog<'a> {
    db: &'a Database,
    policy: ActivePolicy,
    default_limit: i64,
}

impl<'a> ConversationLog<'a> {
    pub fn new(db: &'a Database, policy: ActivePolicy, default_limit: i64) -> Self {
        Self {
            db,
            policy,
            default_limit,
        }
    }

    /// 开始新会话，返回会话 id
    pub fn start(&self, title: &str, tags: &[&str]) -> Result<i64> {
        let title = title.trim();
        if title.is_empty() {
            return Err(MemoryError::validation("conversation title must not be empty"));
        }
        let tags = tags::encode(tags)?;
        let now = time::to_sql(&time::now());

        self.db.write(|conn| {
            if self.policy == ActivePolicy::ClosePrevious {
                let closed = conn.execute(
                    "UPDATE conversations SET ended_at = ?1 WHERE ended_at IS NULL",
                    params![now],
                )?;
                if closed > 0 {
                    tracing::debug!(closed, "closed previously active conversations");
                }
            }
            conn.execute(
                "INSERT INTO conversations (title, started_at, tags) VALUES (?1, ?2, ?3)",
                params![title, now, tags],
            )?;
            let id = conn.last_insert_rowid();
            tracing::debug!(conversation_id = id, title, "conversation started");
            Ok(id)
        })
    }

    /// 追加一条消息；会话不存在时返回 NotFound（已结束的会话照常写入）
    pub fn append_message(&self, conversation_id: i64, role: Role, content: &str) -> Result<Message> {
        if content.trim().is_empty() {
            return Err(MemoryError::validation("message content must not be empty"));
        }
        let created_at = time::now();

        self.db.write(|conn| {
            ensure_exists(conn, conversation_id)?;
            conn.execute(
                "INSERT INTO messages (conversation_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![conversation_id, role.as_str(), content, time::to_sql(&created_at)],
            )?;
            let id = conn.last_insert_rowid();
            tracing::debug!(conversation_id, message_id = id, %role, "message appended");
            Ok(Message {
                id,
                conversation_id,
                role,
                content: content.to_string(),
                created_at,
            })
        })
    }

    /// 结束会话：写入结束时间与摘要（摘要可空）；重复结束会覆盖两者
    pub fn end(&self, conversation_id: i64, summary: Option<&str>) -> Result<()> {
        let now = time::to_sql(&time::now());
        self.db.write(|conn| {
            let changed = conn.execute(
                "UPDATE conversations SET ended_at = ?1, summary = ?2 WHERE id = ?3",
                params![now, summary, conversation_id],
            )?;
            if changed == 0 {
                return Err(MemoryError::NotFound {
                    entity: "conversation",
                    id: conversation_id,
                });
            }
            tracing::debug!(conversation_id, "conversation ended");
            Ok(())
        })
    }

    /// 最近开始的会话，按开始时间倒序；limit 为 None 时用配置默认值
    pub fn list_recent(&self, limit: Option<i64>) -> Result<Vec<Conversation>> {
        let limit = validate_limit(limit.unwrap_or(self.default_limit))?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.db.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 ORDER BY started_at DESC, id DESC
                 LIMIT ?1"
            ))?;
            let rows = stmt.query_map([limit], Conversation::from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// 会话及其全部消息；id 不存在时返回 None（不是错误）
    pub fn get(&self, conversation_id: i64) -> Result<Option<Transcript>> {
        self.db.read(|conn| {
            let conversation = conn
                .query_row(
                    &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                    [conversation_id],
                    Conversation::from_row,
                )
                .optional()?;
            let Some(conversation) = conversation else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, role, content, created_at FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )?;
            let messages = stmt
                .query_map([conversation_id], Message::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Some(Transcript {
                conversation,
                messages,
            }))
        })
    }

    /// 当前活跃会话：最近开始且尚未结束的那个
    pub fn get_active(&self) -> Result<Option<Conversation>> {
        self.db.read(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {CONVERSATION_COLUMNS} FROM conversations
                         WHERE ended_at IS NULL
                         ORDER BY started_at DESC, id DESC
                         LIMIT 1"
                    ),
                    [],
                    Conversation::from_row,
                )
                .optional()?)
        })
    }
}

fn ensure_exists(conn: &rusqlite::Connection, conversation_id: i64) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
        [conversation_id],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(MemoryError::NotFound {
            entity: "conversation",
            id: conversation_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> Database {
        let db = Database::new(dir.path().join("memory.db"), Duration::from_secs(1));
        db.init().unwrap();
        db
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert!(matches!("system".parse::<Role>(), Err(MemoryError::Validation(_))));
        assert!(matches!("User".parse::<Role>(), Err(MemoryError::Validation(_))));
    }

    #[test]
    fn test_start_rejects_empty_title() {
        let dir = TempDir::new().unwrap();
        let db = setup(&dir);
        let log = ConversationLog::new(&db, ActivePolicy::Advisory, 10);
        assert!(matches!(log.start("   ", &[]), Err(MemoryError::Validation(_))));
        assert_eq!(db.stats().unwrap().conversations, 0);
    }

    #[test]
    fn test_start_stores_tags_in_order() {
        let dir = TempDir::new().unwrap();
        let db = setup(&dir);
        let log = ConversationLog::new(&db, ActivePolicy::Advisory, 10);
        let id = log.start("Planning", &["work", "q3", "alpha"]).unwrap();
        let conv = log.get(id).unwrap().unwrap().conversation;
        assert_eq!(conv.title, "Planning");
        assert_eq!(conv.tags, vec!["work", "q3", "alpha"]);
        assert_eq!(conv.state(), ConversationState::Open);
        assert!(conv.summary.is_none());
    }

    #[test]
    fn test_append_to_missing_conversation() {
        let dir = TempDir::new().unwrap();
        let db = setup(&dir);
        let log = ConversationLog::new(&db, ActivePolicy::Advisory, 10);
        let err = log.append_message(99, Role::User, "hello").unwrap_err();
        assert!(matches!(err, MemoryError::NotFound { entity: "conversation", id: 99 }));
        assert_eq!(db.stats().unwrap().messages, 0);
    }

    #[test]
    fn test_append_rejects_blank_content_without_writing() {
        let dir = TempDir::new().unwrap();
        let db = setup(&dir);
        let log = ConversationLog::new(&db, ActivePolicy::Advisory, 10);
        let id = log.start("t", &[]).unwrap();
        assert!(matches!(
            log.append_message(id, Role::User, " \n "),
            Err(MemoryError::Validation(_))
        ));
        let stats = db.stats().unwrap();
        assert_eq!(stats.messages, 0);
        assert_eq!(stats.indexed_messages, 0);
    }

    #[test]
    fn test_end_missing_conversation() {
        let dir = TempDir::new().unwrap();
        let db = setup(&dir);
        let log = ConversationLog::new(&db, ActivePolicy::Advisory, 10);
        assert!(matches!(log.end(5, None), Err(MemoryError::NotFound { .. })));
    }

    #[test]
    fn test_append_after_end_is_allowed() {
        let dir = TempDir::new().unwrap();
        let db = setup(&dir);
        let log = ConversationLog::new(&db, ActivePolicy::Advisory, 10);
        let id = log.start("t", &[]).unwrap();
        log.end(id, Some("done")).unwrap();
        log.append_message(id, Role::Assistant, "one more thing").unwrap();
        let transcript = log.get(id).unwrap().unwrap();
        assert_eq!(transcript.messages.len(), 1);
        assert_eq!(transcript.conversation.state(), ConversationState::Closed);
    }

    #[test]
    fn test_get_distinguishes_missing_from_empty() {
        let dir = TempDir::new().unwrap();
        let db = setup(&dir);
        let log = ConversationLog::new(&db, ActivePolicy::Advisory, 10);
        assert!(log.get(1).unwrap().is_none());
        let id = log.start("empty", &[]).unwrap();
        let transcript = log.get(id).unwrap().unwrap();
        assert!(transcript.messages.is_empty());
    }

    #[test]
    fn test_list_recent_order_and_limits() {
        let dir = TempDir::new().unwrap();
        let db = setup(&dir);
        let log = ConversationLog::new(&db, ActivePolicy::Advisory, 2);
        let a = log.start("a", &[]).unwrap();
        let b = log.start("b", &[]).unwrap();
        let c = log.start("c", &[]).unwrap();

        let ids: Vec<i64> = log.list_recent(Some(10)).unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![c, b, a]);
        assert_eq!(log.list_recent(None).unwrap().len(), 2);
        assert!(log.list_recent(Some(0)).unwrap().is_empty());
        assert!(matches!(log.list_recent(Some(-1)), Err(MemoryError::Validation(_))));
    }

    #[test]
    fn test_get_active_is_latest_open() {
        let dir = TempDir::new().unwrap();
        let db = setup(&dir);
        let log = ConversationLog::new(&db, ActivePolicy::Advisory, 10);
        assert!(log.get_active().unwrap().is_none());

        let first = log.start("first", &[]).unwrap();
        let second = log.start("second", &[]).unwrap();
        // advisory：两个都处于未结束状态，取最近开始的
        assert_eq!(log.get_active().unwrap().unwrap().id, second);

        log.end(second, None).unwrap();
        assert_eq!(log.get_active().unwrap().unwrap().id, first);

        log.end(first, None).unwrap();
        assert!(log.get_active().unwrap().is_none());
    }

    #[test]
    fn test_close_previous_policy() {
        let dir = TempDir::new().unwrap();
        let db = setup(&dir);
        let log = ConversationLog::new(&db, ActivePolicy::ClosePrevious, 10);
        let first = log.start("first", &[]).unwrap();
        log.end(first, Some("kept")).unwrap();
        let second = log.start("second", &[]).unwrap();
        let third = log.start("third", &[]).unwrap();

        let open: Vec<i64> = log
            .list_recent(Some(10))
            .unwrap()
            .into_iter()
            .filter(|c| c.state() == ConversationState::Open)
            .map(|c| c.id)
            .collect();
        assert_eq!(open, vec![third]);
        assert_eq!(log.get_active().unwrap().unwrap().id, third);

        let second = log.get(second).unwrap().unwrap().conversation;
        assert!(second.ended_at.is_some());
        assert!(second.summary.is_none());
        // 已结束的会话不受影响
        let first = log.get(first).unwrap().unwrap().conversation;
        assert_eq!(first.summary.as_deref(), Some("kept"));
    }
}
