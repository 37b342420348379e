//! 记忆库入口：打开（并初始化）数据库，按需借出四个组件
//!
//! ```no_run
//! use bee_memory::memory::{MemoryStore, Role};
//!
//! # fn main() -> bee_memory::core::Result<()> {
//! let store = MemoryStore::open("workspace/memory.db")?;
//! let id = store.conversations().start("Design Review", &["work"])?;
//! store.conversations().append_message(id, Role::User, "what's the status?")?;
//! let hits = store.search().search_all("status", Some(5))?;
//! # let _ = hits;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use super::conversation::ConversationLog;
use super::insights::InsightStore;
use super::preferences::PreferenceStore;
use super::schema::{Database, MemoryStats};
use super::search::SearchEngine;
use crate::config::{AppConfig, SearchSection, StoreSection};
use crate::core::Result;

pub struct MemoryStore {
    db: Database,
    store: StoreSection,
    search: SearchSection,
}

impl MemoryStore {
    /// 使用默认配置打开指定路径的数据库
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = StoreSection {
            db_path: path.as_ref().to_path_buf(),
            ..StoreSection::default()
        };
        Self::with_sections(store, SearchSection::default())
    }

    /// 按应用配置打开（[store] + [search]）
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::with_sections(config.store.clone(), config.search.clone())
    }

    fn with_sections(store: StoreSection, search: SearchSection) -> Result<Self> {
        let db = Database::new(&store.db_path, Duration::from_millis(store.busy_timeout_ms));
        let memory = Self { db, store, search };
        memory.init()?;
        Ok(memory)
    }

    /// 幂等初始化，open 时已调用一次
    pub fn init(&self) -> Result<()> {
        self.db.init()
    }

    pub fn path(&self) -> &Path {
        self.db.path()
    }

    pub fn schema_version(&self) -> Result<i64> {
        self.db.schema_version()
    }

    pub fn conversations(&self) -> ConversationLog<'_> {
        ConversationLog::new(&self.db, self.store.active_policy, self.store.default_list_limit)
    }

    pub fn preferences(&self) -> PreferenceStore<'_> {
        PreferenceStore::new(&self.db)
    }

    pub fn insights(&self) -> InsightStore<'_> {
        InsightStore::new(&self.db)
    }

    pub fn search(&self) -> SearchEngine<'_> {
        SearchEngine::new(
            &self.db,
            self.search.merge,
            self.search.snippet_tokens,
            self.search.default_limit,
        )
    }

    pub fn stats(&self) -> Result<MemoryStats> {
        self.db.stats()
    }

    pub fn check_index(&self) -> Result<()> {
        self.db.check_index()
    }

    pub fn rebuild_index(&self) -> Result<()> {
        self.db.rebuild_index()
    }
}
