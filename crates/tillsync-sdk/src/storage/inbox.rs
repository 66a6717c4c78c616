//! 本地收件箱 + 游标 - 服务器变更的幂等应用
//!
//! 职责：
//! - 把从服务器拉到的变更记入收件箱（审计 / 去重）
//! - 按 token 升序逐条应用到本地投影
//! - 每条应用成功后才推进游标，崩溃重启最多重放、绝不漏掉
//!
//! 每条变更一个事务：收件箱记录 + 投影写入 + 游标推进一起提交。
//! 崩溃可能让游标落后于已应用的行，重启后安全重放（应用是幂等的）。

use std::sync::Arc;

use rusqlite::{params, Connection};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::storage::projection;
use tillsync_core::{ChangeEnvelope, EntityKind};

/// 本地收件箱
#[derive(Debug, Clone)]
pub struct Inbox {
    conn: Arc<Mutex<Connection>>,
}

impl Inbox {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 已成功应用的最高服务器 token（增量拉取的起点）
    pub async fn last_applied_token(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        let token: i64 = conn.query_row(
            "SELECT last_server_token FROM sync_cursor WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(token)
    }

    /// 按 token 升序逐条应用一批服务器变更，返回应用条数
    pub async fn apply_changes(&self, changes: &[ChangeEnvelope]) -> Result<usize> {
        let conn = self.conn.lock().await;
        let mut applied = 0usize;

        for env in changes {
            let tx = conn.unchecked_transaction()?;

            // server_token 唯一 + OR IGNORE：崩溃后重放同一条不会重复记录
            tx.execute(
                "INSERT OR IGNORE INTO inbox
                     (server_token, entity, public_id, op, payload_json, ts_utc, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    env.token,
                    env.entity.as_str(),
                    env.public_id.to_string(),
                    env.op.as_u8(),
                    env.payload_json,
                    env.ts_utc.to_rfc3339(),
                    chrono::Utc::now().to_rfc3339(),
                ],
            )?;

            projection::apply_change(&tx, env)?;

            // 游标只增不减
            tx.execute(
                "UPDATE sync_cursor SET last_server_token = ?1
                 WHERE id = 1 AND last_server_token < ?1",
                [env.token],
            )?;

            tx.commit()?;
            applied += 1;
            debug!("已应用服务器变更: entity={}, token={}", env.entity, env.token);
        }

        Ok(applied)
    }

    /// 读取本地投影中实体的当前快照（已删除或未见过返回 None）
    pub async fn projection(&self, entity: EntityKind, public_id: Uuid) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        projection::get(&conn, entity, public_id)
    }
}
