//! 本地投影 - 最高 token 胜出的快照应用
//!
//! 冲突策略没有字段级合并：每个 Upsert 的 payload 都是写入时的全量快照，
//! 任一节点上实体的当前状态永远是「该 public_id 已见过的最高 token 的
//! Upsert 所说的内容」，且 Delete 压过一切更低 token 的 Upsert。
//! 删除保留墓碑行，低 token 的 Upsert 重放后不会复活实体。

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::Result;
use tillsync_core::{ChangeEnvelope, ChangeOp, EntityKind};

/// 单条变更的应用结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// 已写入投影
    Applied,
    /// token 低于已存状态，按最高 token 胜出规则忽略
    Stale,
}

/// 在调用方事务/连接上应用一条变更（幂等：重复应用同一条是无害空操作）
pub fn apply_change(conn: &Connection, env: &ChangeEnvelope) -> Result<ApplyOutcome> {
    let existing_token: Option<i64> = conn
        .query_row(
            "SELECT token FROM replica_state WHERE entity = ?1 AND public_id = ?2",
            params![env.entity.as_str(), env.public_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(token) = existing_token {
        if env.token < token {
            return Ok(ApplyOutcome::Stale);
        }
    }

    match env.op {
        ChangeOp::Upsert => {
            conn.execute(
                "INSERT OR REPLACE INTO replica_state (entity, public_id, payload_json, token, deleted)
                 VALUES (?1, ?2, ?3, ?4, 0)",
                params![
                    env.entity.as_str(),
                    env.public_id.to_string(),
                    env.payload_json,
                    env.token,
                ],
            )?;
        }
        ChangeOp::Delete => {
            // 墓碑：payload 清空、deleted 置位，token 照常推进
            conn.execute(
                "INSERT OR REPLACE INTO replica_state (entity, public_id, payload_json, token, deleted)
                 VALUES (?1, ?2, '', ?3, 1)",
                params![env.entity.as_str(), env.public_id.to_string(), env.token],
            )?;
        }
    }
    Ok(ApplyOutcome::Applied)
}

/// 读取实体当前快照；已删除（墓碑）或从未见过返回 None
pub fn get(conn: &Connection, entity: EntityKind, public_id: Uuid) -> Result<Option<String>> {
    let payload: Option<String> = conn
        .query_row(
            "SELECT payload_json FROM replica_state
             WHERE entity = ?1 AND public_id = ?2 AND deleted = 0",
            params![entity.as_str(), public_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(payload)
}
