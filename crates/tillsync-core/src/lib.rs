//! Tillsync Core - 离线优先复制引擎的共享类型
//!
//! 本 crate 提供终端 SDK 与中心服务器共用的核心类型：
//! - 变更信封（ChangeEnvelope）：复制的最小单元，一旦写入日志即不可变
//! - 受控实体枚举（EntityKind）：可复制的领域聚合类型，新增需两端同步升级
//! - 操作枚举（ChangeOp）：Upsert / Delete 两种操作，无字段级局部更新
//! - Token 生成器（TokenGenerator）：进程级严格递增的 64 位逻辑时钟
//! - 线协议 DTO（wire）：push / pull / health 的请求与响应结构

pub mod envelope;
pub mod token;
pub mod wire;

// 重新导出核心类型，方便使用
pub use envelope::{ChangeEnvelope, ChangeOp, EntityKind};
pub use token::{TokenGenerator, TOKEN_INSERT_RETRIES};
pub use wire::{
    clamp_pull_limit, HealthResponse, PullResponse, PushRequest, PushResponse, WireChange,
    DEFAULT_PULL_LIMIT, MAX_PULL_LIMIT,
};
