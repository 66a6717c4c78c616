//! 服务器库 schema 生命周期
//!
//! 与终端 SDK 同一套打开流程：pragmas → 降级保护 → migrations。
//! feed 库被旧版服务器二进制打开时（回滚部署撞上已升级的库），
//! 明确拒绝并说明原因，而不是依赖 refinery 的 checksum 报错。

mod embedded {
    use refinery::embed_migrations;

    embed_migrations!("./migrations");
}

use rusqlite::Connection;

use crate::error::{Result, ServerError};

/// 本服务器二进制认识的最高 schema 版本；新增 migrations/V{n}__*.sql 时同步 +1
pub const SERVER_DB_VERSION: i64 = 1;

/// WAL + NORMAL：多终端并发推送下写入不等 fsync；临时表走内存。
const SERVER_PRAGMAS: &str = "
PRAGMA journal_mode=WAL;
PRAGMA synchronous=NORMAL;
PRAGMA temp_store=MEMORY;
";

pub fn enable_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(SERVER_PRAGMAS.trim())
        .map_err(|e| ServerError::Database(format!("设置 PRAGMA 失败: {}", e)))?;
    Ok(())
}

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    embedded::migrations::runner()
        .run(conn)
        .map_err(|e| ServerError::Migration(format!("执行 migration 失败: {}", e)))?;
    Ok(())
}

/// 库文件当前的 schema 版本，取自 refinery 的历史表；全新库为 0
fn schema_version(conn: &Connection) -> Result<i64> {
    let has_history: bool = conn
        .query_row(
            "SELECT EXISTS (
                 SELECT 1 FROM sqlite_master
                 WHERE type = 'table' AND name = 'refinery_schema_history'
             )",
            [],
            |row| row.get(0),
        )
        .map_err(|e| ServerError::Database(format!("读取 schema 版本失败: {}", e)))?;
    if !has_history {
        return Ok(0);
    }

    let version: Option<i64> = conn
        .query_row(
            "SELECT MAX(version) FROM refinery_schema_history",
            [],
            |row| row.get(0),
        )
        .map_err(|e| ServerError::Database(format!("读取 schema 版本失败: {}", e)))?;
    Ok(version.unwrap_or(0))
}

/// 降级保护：库的 schema 版本超出本二进制认识的范围时拒绝启动
fn guard_against_downgrade(conn: &Connection) -> Result<()> {
    let found = schema_version(conn)?;
    if found > SERVER_DB_VERSION {
        return Err(ServerError::Migration(format!(
            "feed 库 schema 版本为 {}，本服务器最高只认识 {}：部署回滚撞上了已升级的库，拒绝启动",
            found, SERVER_DB_VERSION
        )));
    }
    Ok(())
}

/// 打开服务器库时的唯一初始化入口
///
/// 降级保护先于 migration 执行：版本过新的库要在 refinery 对不上
/// 嵌入清单而报错之前，先给出明确的拒绝原因。
pub fn init_db(conn: &mut Connection) -> Result<()> {
    enable_pragmas(conn)?;
    guard_against_downgrade(conn)?;
    run_migrations(conn)
}
