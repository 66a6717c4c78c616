//! 本地发件箱 - 只追加的变更日志
//!
//! 核心正确性不变量：领域写与信封写必须在**同一本地事务**内提交——
//! 没有信封的领域写不能提交，没有已提交领域写的信封不能存在。
//! 领域服务在自己的事务里调用 `enqueue_in_tx`；便捷方法
//! `enqueue_upsert` / `enqueue_delete` 适用于变更本身就是独立事务的场合。
//!
//! 发件箱不做任何实体级校验：业务规则由领域服务负责，这里是纯日志边界。

use std::sync::Arc;

use rusqlite::{params, Connection, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, TillsyncError};
use tillsync_core::{ChangeEnvelope, ChangeOp, EntityKind, TokenGenerator, TOKEN_INSERT_RETRIES};

/// 本地发件箱
#[derive(Debug, Clone)]
pub struct Outbox {
    conn: Arc<Mutex<Connection>>,
    tokens: Arc<TokenGenerator>,
}

impl Outbox {
    pub fn new(conn: Arc<Mutex<Connection>>, tokens: Arc<TokenGenerator>) -> Self {
        Self { conn, tokens }
    }

    /// 追加一条 Upsert 信封（payload 为聚合的全量快照）
    pub async fn enqueue_upsert(
        &self,
        entity: EntityKind,
        public_id: Uuid,
        payload: &serde_json::Value,
    ) -> Result<i64> {
        let payload_json = serde_json::to_string(payload)?;
        let conn = self.conn.lock().await;
        let tx = conn.unchecked_transaction()?;
        let token = Self::enqueue_in_tx(
            &tx,
            &self.tokens,
            entity,
            public_id,
            ChangeOp::Upsert,
            &payload_json,
        )?;
        tx.commit()?;
        Ok(token)
    }

    /// 追加一条 Delete 信封（payload 为空）
    pub async fn enqueue_delete(&self, entity: EntityKind, public_id: Uuid) -> Result<i64> {
        let conn = self.conn.lock().await;
        let tx = conn.unchecked_transaction()?;
        let token =
            Self::enqueue_in_tx(&tx, &self.tokens, entity, public_id, ChangeOp::Delete, "")?;
        tx.commit()?;
        Ok(token)
    }

    /// 在调用方事务内追加信封（与领域写同事务提交）
    ///
    /// token 唯一冲突只可能出现在多个生成器实例并存时（如进程重启且时钟回拨），
    /// 取新 token 重试至多 TOKEN_INSERT_RETRIES 次，仍失败即视为逻辑时钟
    /// 回退 bug，致命失败。
    pub fn enqueue_in_tx(
        tx: &Transaction<'_>,
        tokens: &TokenGenerator,
        entity: EntityKind,
        public_id: Uuid,
        op: ChangeOp,
        payload_json: &str,
    ) -> Result<i64> {
        let mut attempts = 0u32;
        loop {
            let token = tokens.next_token();
            let result = tx.execute(
                "INSERT INTO outbox (token, entity, public_id, op, payload_json, ts_utc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    token,
                    entity.as_str(),
                    public_id.to_string(),
                    op.as_u8(),
                    payload_json,
                    chrono::Utc::now().to_rfc3339(),
                ],
            );
            match result {
                Ok(_) => {
                    debug!("发件箱已追加: entity={}, token={}", entity, token);
                    return Ok(token);
                }
                Err(e) if is_unique_violation(&e) => {
                    attempts += 1;
                    if attempts >= TOKEN_INSERT_RETRIES {
                        return Err(TillsyncError::TokenRegression(format!(
                            "token 连续 {} 次唯一冲突，逻辑时钟回退: {}",
                            attempts, e
                        )));
                    }
                    warn!("token 唯一冲突，取新值重试: token={}, attempt={}", token, attempts);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// 未确认的信封，按本地 token 升序、封顶一批
    pub async fn pending_batch(&self, limit: usize) -> Result<Vec<ChangeEnvelope>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT token, entity, public_id, op, payload_json, ts_utc
             FROM outbox WHERE acked = 0 ORDER BY token ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], row_to_envelope)?;

        let mut batch = Vec::new();
        for row in rows {
            batch.push(row.map_err(|e| {
                TillsyncError::Database(format!("读取发件箱记录失败: {}", e))
            })?);
        }
        Ok(batch)
    }

    /// 标记本地 token 区间已被服务器确认（不再重发）
    pub async fn mark_acked(&self, up_to_token: i64) -> Result<usize> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE outbox SET acked = 1 WHERE acked = 0 AND token <= ?1",
            [up_to_token],
        )?;
        debug!("发件箱已确认 {} 条 (token <= {})", changed, up_to_token);
        Ok(changed)
    }

    /// 未确认条数（同步健康面板用）
    pub async fn pending_count(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM outbox WHERE acked = 0", [], |row| {
                row.get(0)
            })?;
        Ok(count as u64)
    }
}

/// 行 → 信封；entity / op 是写入时就校验过的受控枚举，解析失败说明库被外部改写
fn row_to_envelope(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChangeEnvelope> {
    let entity_str: String = row.get(1)?;
    let public_id_str: String = row.get(2)?;
    let op_raw: u8 = row.get(3)?;

    let entity = entity_str.parse::<EntityKind>().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("未知实体: {}", entity_str).into(),
        )
    })?;
    let public_id = Uuid::parse_str(&public_id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let op = ChangeOp::from_u8(op_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Integer,
            format!("无效的 Op 枚举值: {}", op_raw).into(),
        )
    })?;

    Ok(ChangeEnvelope {
        entity,
        public_id,
        op,
        payload_json: row.get(4)?,
        ts_utc: row.get(5)?,
        token: row.get(0)?,
    })
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_enqueue_and_pending_order() {
        let store = LocalStore::open_in_memory("till-01").await.unwrap();
        let outbox = store.outbox();

        let id1 = Uuid::new_v4();
        let id2 = Uuid::new_v4();
        let t1 = outbox
            .enqueue_upsert(EntityKind::Sale, id1, &json!({"total": 100}))
            .await
            .unwrap();
        let t2 = outbox
            .enqueue_upsert(EntityKind::Sale, id2, &json!({"total": 200}))
            .await
            .unwrap();
        let t3 = outbox.enqueue_delete(EntityKind::Sale, id1).await.unwrap();
        assert!(t1 < t2 && t2 < t3);

        let pending = outbox.pending_batch(100).await.unwrap();
        assert_eq!(pending.len(), 3);
        // 批内按本地 token 升序，永不重排
        assert_eq!(pending[0].token, t1);
        assert_eq!(pending[1].token, t2);
        assert_eq!(pending[2].token, t3);
        assert_eq!(pending[2].op, ChangeOp::Delete);
        assert!(pending[2].payload_json.is_empty());

        // limit 封顶
        let capped = outbox.pending_batch(2).await.unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[tokio::test]
    async fn test_mark_acked_stops_resend() {
        let store = LocalStore::open_in_memory("till-01").await.unwrap();
        let outbox = store.outbox();

        let t1 = outbox
            .enqueue_upsert(EntityKind::Item, Uuid::new_v4(), &json!({"name": "tea"}))
            .await
            .unwrap();
        let t2 = outbox
            .enqueue_upsert(EntityKind::Item, Uuid::new_v4(), &json!({"name": "cola"}))
            .await
            .unwrap();

        assert_eq!(outbox.pending_count().await.unwrap(), 2);
        let acked = outbox.mark_acked(t1).await.unwrap();
        assert_eq!(acked, 1);

        let pending = outbox.pending_batch(100).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].token, t2);

        // 重复确认是无害的空操作
        assert_eq!(outbox.mark_acked(t1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rollback_leaves_no_envelope() {
        let store = LocalStore::open_in_memory("till-01").await.unwrap();
        let outbox = store.outbox();
        let tokens = store.tokens();

        {
            let conn = store.connection();
            let conn = conn.lock().await;
            let tx = conn.unchecked_transaction().unwrap();
            Outbox::enqueue_in_tx(
                &tx,
                &tokens,
                EntityKind::Voucher,
                Uuid::new_v4(),
                ChangeOp::Upsert,
                r#"{"amount": 50}"#,
            )
            .unwrap();
            // 领域写失败 → 事务回滚，信封必须随之消失
            drop(tx);
        }

        assert_eq!(outbox.pending_count().await.unwrap(), 0);
    }
}
