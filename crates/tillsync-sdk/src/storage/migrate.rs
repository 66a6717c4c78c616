//! 终端库 schema 生命周期
//!
//! 复制日志的 schema 由 refinery 管理：`migrations/V{n}__{name}.sql` 在编译期
//! 嵌入，打开本地库时按版本顺序补齐。打开流程固定为三步：
//! pragmas → 降级保护 → migrations。降级保护针对的是现场常见的一种事故：
//! 终端刷回旧版 SDK 后打开新 schema 的库——此时拒绝打开比带着半懂不懂的
//! schema 继续写日志安全得多。

mod embedded {
    use refinery::embed_migrations;

    embed_migrations!("./migrations");
}

use rusqlite::Connection;

use crate::error::{Result, TillsyncError};
use crate::version::SDK_DB_VERSION;

/// WAL + NORMAL：崩溃安全且收银写入不等 fsync；外键约束开启，临时表走内存。
const TERMINAL_PRAGMAS: &str = "
PRAGMA journal_mode=WAL;
PRAGMA synchronous=NORMAL;
PRAGMA foreign_keys=ON;
PRAGMA temp_store=MEMORY;
";

pub fn enable_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(TERMINAL_PRAGMAS.trim())
        .map_err(|e| TillsyncError::Database(format!("设置 PRAGMA 失败: {}", e)))?;
    Ok(())
}

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    embedded::migrations::runner()
        .run(conn)
        .map_err(|e| TillsyncError::Migration(format!("执行 migration 失败: {}", e)))?;
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
        .map_err(|e| TillsyncError::Database(format!("读取 schema 版本失败: {}", e)))?;
    if !has_history {
        return Ok(0);
    }

    // MAX 对空表返回一行 NULL：表在但没跑过任何 migration，同样按 0 处理
    let version: Option<i64> = conn
        .query_row(
            "SELECT MAX(version) FROM refinery_schema_history",
            [],
            |row| row.get(0),
        )
        .map_err(|e| TillsyncError::Database(format!("读取 schema 版本失败: {}", e)))?;
    Ok(version.unwrap_or(0))
}

/// 降级保护：库的 schema 版本超出本 SDK 认识的范围时拒绝打开
fn guard_against_downgrade(conn: &Connection) -> Result<()> {
    let found = schema_version(conn)?;
    if found > SDK_DB_VERSION {
        return Err(TillsyncError::Migration(format!(
            "本地库 schema 版本为 {}，本 SDK 最高只认识 {}：终端装回了旧版 SDK，拒绝打开",
            found, SDK_DB_VERSION
        )));
    }
    Ok(())
}

/// 打开本地库时的唯一初始化入口
///
/// 降级保护先于 migration 执行：版本过新的库要在 refinery 对不上
/// 嵌入清单而报错之前，先给出明确的拒绝原因。
pub fn init_db(conn: &mut Connection) -> Result<()> {
    enable_pragmas(conn)?;
    guard_against_downgrade(conn)?;
    run_migrations(conn)
}
