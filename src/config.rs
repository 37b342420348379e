//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE_MEMORY__*` 覆盖（双下划线表示嵌套，如 `BEE_MEMORY__STORE__DB_PATH=/tmp/memory.db`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub seed: SeedSection,
}

/// [store] 段：数据库文件、连接等待、列表默认条数、活跃会话策略
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// 数据库被锁时的等待时间（毫秒）
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// list_recent 未指定 limit 时的条数
    #[serde(default = "default_list_limit")]
    pub default_list_limit: i64,
    #[serde(default)]
    pub active_policy: ActivePolicy,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("workspace/memory.db")
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_list_limit() -> i64 {
    10
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            default_list_limit: default_list_limit(),
            active_policy: ActivePolicy::default(),
        }
    }
}

/// 「活跃会话」策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivePolicy {
    /// 不强制：允许同时存在多个未结束会话，get_active 取最近开始的那个
    #[default]
    Advisory,
    /// start 时在同一事务内结束所有未结束会话，保证至多一个活跃会话
    ClosePrevious,
}

/// [search] 段：默认条数、摘要长度、两路结果合并方式
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_search_limit")]
    pub default_limit: i64,
    /// snippet() 截取的最大词数
    #[serde(default = "default_snippet_tokens")]
    pub snippet_tokens: u32,
    #[serde(default)]
    pub merge: MergeStrategy,
}

fn default_search_limit() -> i64 {
    10
}

fn default_snippet_tokens() -> u32 {
    32
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            default_limit: default_search_limit(),
            snippet_tokens: default_snippet_tokens(),
            merge: MergeStrategy::default(),
        }
    }
}

/// 消息与洞察两路检索结果的合并方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// 消息在前、洞察在后直接拼接再截断（不跨来源比较相关度）
    #[default]
    Concatenate,
    /// 倒数排名融合（RRF，k=60），两路按各自排名交织后截断
    ReciprocalRankFusion,
}

/// [seed] 段：启动时导入的种子文件
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SeedSection {
    pub path: Option<PathBuf>,
}

/// 组装记忆库配置，后加入的来源覆盖先加入的同名键
///
/// 来源依次为：工作目录附近第一个存在的 default.toml（config/、../config/ 或当前目录）；
/// 调用方指定的配置文件（不存在时跳过）；`BEE_MEMORY__` 前缀的环境变量，
/// 如 `BEE_MEMORY__STORE__DB_PATH` 对应 `store.db_path`。
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE_MEMORY")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
