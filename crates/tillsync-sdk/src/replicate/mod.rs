//! 复制模块 - push / pull 客户端与后台同步引擎
//!
//! 职责：
//! - push：把发件箱未确认信封整批提交到服务器（至少一次语义）
//! - pull：拉取高于本地游标的服务器变更并幂等应用
//! - engine：按周期串行执行 push + pull，失败时指数退避、无限重试
//!
//! 复制永不阻塞发起变更的业务操作：发件箱写入是本地的、快速的，
//! push / pull 失败只体现为后台「上次同步」状态，绝不体现为业务失败。

pub mod engine;
pub mod pull;
pub mod push;

pub use engine::{SyncEngine, SyncReport, SyncStatus};
pub use pull::{PullClient, PullOutcome};
pub use push::{PushClient, PushOutcome};
