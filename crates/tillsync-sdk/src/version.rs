//! 版本常量

/// SDK 版本（编译期取自 Cargo.toml）
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 当前 SDK 支持的最高本地数据库 migration 版本
///
/// 新增 migrations/V{n}__*.sql 时同步 +1，用于防 downgrade 校验。
pub const SDK_DB_VERSION: i64 = 1;
