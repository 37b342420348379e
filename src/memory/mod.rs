//! 记忆层：对话日志、偏好、洞察、全文检索，统一落在一个 SQLite 文件里

pub mod conversation;
pub mod insights;
pub mod long_term;
pub mod preferences;
pub mod schema;
pub mod search;
pub mod seed;
pub mod store;
pub mod tags;

pub use conversation::{Conversation, ConversationLog, ConversationState, Message, Role, Transcript};
pub use insights::{Insight, InsightKind, InsightStore};
pub use long_term::{LongTermMemory, NoopLongTerm, StoreLongTerm};
pub use preferences::{Preference, PreferenceStore, DEFAULT_CONFIDENCE};
pub use schema::{Database, MemoryStats, SCHEMA_VERSION};
pub use search::{escape_query, ConversationMatch, HitSource, SearchEngine, SearchHit};
pub use seed::{SeedFile, SeedReport};
pub use store::MemoryStore;

use crate::core::{MemoryError, Result};

/// 列表类操作的 limit：0 合法（返回空），负数报 Validation
pub(crate) fn validate_limit(limit: i64) -> Result<i64> {
    if limit < 0 {
        return Err(MemoryError::validation(format!(
            "limit must be a non-negative integer, got {limit}"
        )));
    }
    Ok(limit)
}
