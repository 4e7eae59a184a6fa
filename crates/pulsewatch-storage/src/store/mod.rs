use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection};
use std::path::Path;
use std::str::FromStr;

use crate::error::{Result, StorageError};

pub mod catalog;
pub mod contact;
pub mod notify;
pub mod state;

/// 告警流水线的统一持久化层（SeaORM）。
///
/// 实现 [`crate::RuleCatalog`]、[`crate::StateStore`]、
/// [`crate::NotifyLogStore`] 与 [`crate::ContactRegistry`] 四个接口。
pub struct AlertStore {
    pub(crate) db: DatabaseConnection,
}

impl AlertStore {
    /// 连接并初始化数据库。
    ///
    /// - `db_url`：完整的数据库连接 URL，例如 `sqlite://data/pulsewatch.db?mode=rwc`
    /// - `data_dir`：本地数据目录，SQLite 文件所在位置，启动时自动创建
    ///
    /// 自动运行 `sea-orm-migration` 迁移，确保 Schema 最新。
    pub async fn new(db_url: &str, data_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db = Database::connect(db_url).await?;

        // WAL 模式仅对 SQLite 有效
        if db_url.starts_with("sqlite:") {
            db.execute_unprepared("PRAGMA journal_mode=WAL;").await?;
        }

        Migrator::up(&db, None).await?;
        tracing::info!("Initialized alert store (SeaORM)");

        Ok(Self { db })
    }

    /// 返回底层数据库连接引用（供子模块使用）。
    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

/// 把字符串列解析为领域枚举，失败时返回 `InvalidValue`。
pub(crate) fn parse_column<T: FromStr>(column: &'static str, value: &str) -> Result<T> {
    value.parse().map_err(|_| StorageError::InvalidValue {
        column,
        value: value.to_string(),
    })
}
