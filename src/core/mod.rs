//! 核心：错误类型与时间戳约定

pub mod error;
pub mod time;

pub use error::{ErrorKind, MemoryError, Result};
