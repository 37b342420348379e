//! 记忆库错误类型
//!
//! 四类错误对调用方可见：Validation / NotFound / QuerySyntax / Storage。
//! 核心层不做兜底：校验失败在写入前返回，存储错误原样上抛。

use thiserror::Error;

/// 记忆库操作可能出现的错误
#[derive(Error, Debug)]
pub enum MemoryError {
    /// 输入不合法：必填字段为空、枚举值越界、limit 为负等
    #[error("Validation error: {0}")]
    Validation(String),

    /// 按 id 操作的目标不存在（append_message / end）
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// 全文检索表达式不合法（FTS5 语法错误）
    #[error("Query syntax error: {0}")]
    QuerySyntax(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 库中时间戳无法解析（行已损坏）
    #[error("Timestamp parse error: {0}")]
    Timestamp(String),

    #[error("Unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// 错误大类，便于调用方按四类分别处理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    QuerySyntax,
    Storage,
}

impl MemoryError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MemoryError::Validation(_) => ErrorKind::Validation,
            MemoryError::NotFound { .. } => ErrorKind::NotFound,
            MemoryError::QuerySyntax(_) => ErrorKind::QuerySyntax,
            MemoryError::Storage(_)
            | MemoryError::Io(_)
            | MemoryError::Timestamp(_)
            | MemoryError::UnsupportedSchemaVersion { .. } => ErrorKind::Storage,
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_groups_storage_variants() {
        assert_eq!(MemoryError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(
            MemoryError::NotFound { entity: "conversation", id: 7 }.kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            MemoryError::Timestamp("bad".into()).kind(),
            ErrorKind::Storage
        );
        assert_eq!(
            MemoryError::Io(std::io::Error::other("disk full")).kind(),
            ErrorKind::Storage
        );
    }

    #[test]
    fn test_not_found_message() {
        let err = MemoryError::NotFound { entity: "conversation", id: 42 };
        assert_eq!(err.to_string(), "conversation 42 not found");
    }
}
