//! Bee Memory - 个人智能体的持久化记忆库
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、时间戳约定
//! - **memory**: 对话日志、偏好、洞察、全文检索与存储层
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod memory;
pub mod observability;

pub use crate::core::{ErrorKind, MemoryError, Result};
pub use memory::MemoryStore;
