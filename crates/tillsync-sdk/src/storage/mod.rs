//! 终端本地存储 - 发件箱 / 收件箱 / 游标 / 投影
//!
//! 本模块提供：
//! - SQLite 本地库（WAL 模式，refinery 管理 schema）
//! - 只追加的发件箱（outbox）与收件箱（inbox）
//! - 单行游标：已应用的最高服务器 token
//! - 本地投影（replica_state）：每个聚合的最新快照
//!
//! 本地库归终端进程独占；复制引擎之外的领域服务只通过发件箱写入。

pub mod inbox;
pub mod migrate;
pub mod outbox;
pub mod projection;

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::error::{Result, TillsyncError};
use tillsync_core::TokenGenerator;

pub use inbox::Inbox;
pub use outbox::Outbox;
pub use projection::ApplyOutcome;

/// 终端本地存储
///
/// 连接由单把异步互斥锁保护：单终端、串行写入，竞争预期很低。
#[derive(Debug)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
    tokens: Arc<TokenGenerator>,
    terminal_id: String,
}

impl LocalStore {
    /// 打开（必要时创建）终端本地库
    ///
    /// 重启后用 outbox 内最大 token 抬升生成器水位，即使时钟回拨也不会重发旧值。
    pub async fn open(data_dir: &Path, terminal_id: &str) -> Result<Self> {
        let dir = data_dir.join(terminal_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| TillsyncError::IO(format!("创建终端数据目录失败: {}", e)))?;

        let db_path = dir.join("tillsync.db");
        let conn = Connection::open(&db_path)
            .map_err(|e| TillsyncError::Database(format!("打开本地库失败: {}", e)))?;

        let store = Self::from_connection(conn, terminal_id)?;
        tracing::info!("终端本地库已打开: {} ({})", terminal_id, db_path.display());
        Ok(store)
    }

    /// 打开内存库（测试用）
    pub async fn open_in_memory(terminal_id: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| TillsyncError::Database(format!("打开内存库失败: {}", e)))?;
        Self::from_connection(conn, terminal_id)
    }

    fn from_connection(mut conn: Connection, terminal_id: &str) -> Result<Self> {
        migrate::init_db(&mut conn)?;

        let tokens = TokenGenerator::new();
        let max_token: i64 = conn
            .query_row("SELECT COALESCE(MAX(token), 0) FROM outbox", [], |row| {
                row.get(0)
            })
            .map_err(|e| TillsyncError::Database(format!("读取发件箱水位失败: {}", e)))?;
        tokens.observe(max_token);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            tokens: Arc::new(tokens),
            terminal_id: terminal_id.to_string(),
        })
    }

    /// 发件箱句柄
    pub fn outbox(&self) -> Outbox {
        Outbox::new(self.conn.clone(), self.tokens.clone())
    }

    /// 收件箱句柄
    pub fn inbox(&self) -> Inbox {
        Inbox::new(self.conn.clone())
    }

    pub fn terminal_id(&self) -> &str {
        &self.terminal_id
    }

    /// 底层连接（领域服务在同一事务内写业务表与发件箱时使用）
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    /// 本地 token 生成器
    pub fn tokens(&self) -> Arc<TokenGenerator> {
        self.tokens.clone()
    }
}
