//! Tillsync SDK - 离线优先的终端复制引擎
//!
//! 每台收银终端独立运行、经常断网，本 SDK 让它们与中心服务器最终一致，
//! 且离线期间照常开单：
//! - 📤 发件箱：领域写与变更信封在同一本地事务内提交
//! - 📥 收件箱 + 游标：服务器变更的幂等应用与增量拉取
//! - 🔢 Token 生成器：跨重启存活的严格递增逻辑时钟
//! - 🔁 同步引擎：周期 push / pull，离线退避，永不阻塞业务操作
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use tillsync_sdk::{LocalStore, SyncConfig, SyncEngine};
//! use tillsync_core::EntityKind;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::builder()
//!         .data_dir("/var/lib/tillsync")
//!         .server_url("http://sync.example.com:8686")
//!         .terminal_id("till-01")
//!         .build();
//!
//!     let store = LocalStore::open(&config.data_dir, "till-01").await?;
//!
//!     // 领域服务开单后写发件箱（与领域写同事务时用 enqueue_in_tx）
//!     let sale_id = uuid::Uuid::new_v4();
//!     store
//!         .outbox()
//!         .enqueue_upsert(EntityKind::Sale, sale_id, &serde_json::json!({"total": 100}))
//!         .await?;
//!
//!     // 后台同步循环
//!     let engine = Arc::new(SyncEngine::new(&store, config)?);
//!     engine.clone().spawn();
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod replicate;
pub mod storage;
pub mod version;

// 重新导出核心类型，方便使用
pub use config::{HttpClientConfig, RetryConfig, SyncConfig, SyncConfigBuilder};
pub use error::{Result, TillsyncError};
pub use replicate::{
    PullClient, PullOutcome, PushClient, PushOutcome, SyncEngine, SyncReport, SyncStatus,
};
pub use storage::{ApplyOutcome, Inbox, LocalStore, Outbox};

// 共享核心类型一并导出，避免用户单独依赖 tillsync-core
pub use tillsync_core::{ChangeEnvelope, ChangeOp, EntityKind, TokenGenerator};
