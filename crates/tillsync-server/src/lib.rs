//! tillsync-server - 中心同步服务器
//!
//! 职责：
//! - 维护全终端共享的只追加变更日志（change_feed）与每终端推送游标
//! - 暴露 /sync/push、/sync/pull、/health 三个 HTTP 端点
//! - 服务器只做日志与分发，不做业务裁决：最高 token 胜出在终端侧执行

pub mod error;
pub mod feed;
pub mod routes;

mod migrate;

pub use error::{Result, ServerError};
pub use feed::{AppendAck, ChangeFeed};
pub use routes::{create_router, AppState};
