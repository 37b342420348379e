//! Bee Memory 引导程序
//!
//! 入口：初始化日志、加载配置、打开（并初始化）记忆库、导入种子文件、校验索引并输出统计。

use anyhow::Context;
use bee_memory::{
    config::load_config,
    memory::{seed, MemoryStore, SeedFile},
    observability,
};

fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    observability::init();

    let config = load_config(None).context("Failed to load config")?;
    let store = MemoryStore::from_config(&config)
        .with_context(|| format!("Failed to open memory store at {}", config.store.db_path.display()))?;
    tracing::info!(
        path = %store.path().display(),
        schema_version = store.schema_version()?,
        "memory store ready"
    );

    if let Some(path) = &config.seed.path {
        let seed_file = SeedFile::load(path)
            .with_context(|| format!("Failed to read seed file {}", path.display()))?;
        seed::apply(&store, &seed_file).context("Seed import failed")?;
    }

    store.check_index().context("Search index integrity check failed")?;

    let stats = store.stats()?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
