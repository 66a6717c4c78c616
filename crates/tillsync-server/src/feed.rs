//! 服务器变更日志 - 全终端共享的只追加 feed + 每终端游标
//!
//! 职责：
//! - 为每条进入的变更分配全局唯一、严格递增的 token（与终端同一套发号策略）
//! - 整批原子追加：feed 写入与来源终端的游标推进在同一事务内提交，
//!   客户端绝不会观察到「部分接受」的 push
//! - 自回声抑制：拉取时排除请求终端自己推上来的变更
//!
//! feed 在本设计中永不清理（永久审计轨迹），保留/压缩是明确的非目标。

use std::path::Path;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, ServerError};
use crate::migrate;
use tillsync_core::{
    ChangeEnvelope, ChangeOp, EntityKind, TokenGenerator, WireChange, TOKEN_INSERT_RETRIES,
};

/// 整批追加的确认
#[derive(Debug, Clone, Copy)]
pub struct AppendAck {
    /// 被接受的条数（等于批大小，整批原子）
    pub accepted: u32,
    /// 本批分配的最后一个全局 token
    pub last_token: i64,
}

/// 服务器变更日志
#[derive(Debug)]
pub struct ChangeFeed {
    conn: Arc<Mutex<Connection>>,
    tokens: Arc<TokenGenerator>,
}

impl ChangeFeed {
    /// 打开（必要时创建）服务器库
    pub async fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .map_err(|e| ServerError::Database(format!("打开服务器库失败: {}", e)))?;
        let feed = Self::from_connection(conn)?;
        info!("服务器变更日志已打开: {}", db_path.display());
        Ok(feed)
    }

    /// 打开内存库（测试用）
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ServerError::Database(format!("打开内存库失败: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        migrate::init_db(&mut conn)?;

        // 重启后用 feed 内最大 token 抬升发号水位，时钟回拨也不会重发旧值
        let tokens = TokenGenerator::new();
        let max_token: i64 = conn
            .query_row("SELECT COALESCE(MAX(token), 0) FROM change_feed", [], |row| {
                row.get(0)
            })
            .map_err(|e| ServerError::Database(format!("读取 feed 水位失败: {}", e)))?;
        tokens.observe(max_token);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            tokens: Arc::new(tokens),
        })
    }

    /// 整批原子追加一个终端推上来的变更，返回最后分配的全局 token
    ///
    /// 重复 push（至少一次语义下的重发）被当作无害的冗余追加接受：
    /// feed 是快照日志，重复的相同信封只产生多余但收敛的条目。
    pub async fn append(&self, source_terminal: &str, changes: &[WireChange]) -> Result<AppendAck> {
        if changes.is_empty() {
            return Err(ServerError::InvalidBatch("Changes 不能为空".to_string()));
        }

        // 边界校验先行：任何一条畸形即整批拒绝，绝不部分应用
        let mut parsed = Vec::with_capacity(changes.len());
        for wire in changes {
            let entity = wire.entity_kind().ok_or_else(|| {
                ServerError::InvalidBatch(format!("未知实体: {}", wire.entity))
            })?;
            let op = wire.change_op().ok_or_else(|| {
                ServerError::InvalidBatch(format!("无效的 Op 枚举值: {}", wire.op))
            })?;
            parsed.push((entity, op, wire));
        }

        let conn = self.conn.lock().await;
        let tx = conn.unchecked_transaction()?;

        let mut last_token = 0i64;
        for (entity, op, wire) in &parsed {
            last_token =
                insert_with_fresh_token(&tx, &self.tokens, source_terminal, *entity, *op, wire)?;
        }

        // 同一事务内推进该终端的推送水位（只增不减）
        tx.execute(
            "INSERT INTO terminal_cursors (terminal_id, last_token, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(terminal_id) DO UPDATE SET
                 last_token = excluded.last_token,
                 updated_at = excluded.updated_at
             WHERE excluded.last_token > terminal_cursors.last_token",
            params![source_terminal, last_token, chrono::Utc::now().to_rfc3339()],
        )?;

        tx.commit()?;
        info!(
            "feed 已追加: source={}, count={}, last_token={}",
            source_terminal,
            parsed.len(),
            last_token
        );

        Ok(AppendAck {
            accepted: parsed.len() as u32,
            last_token,
        })
    }

    /// 高于 since 的变更，排除请求终端自己的（自回声抑制），按 token 升序封顶一批
    pub async fn changes_since(
        &self,
        terminal_id: &str,
        since: i64,
        limit: u32,
    ) -> Result<Vec<ChangeEnvelope>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT token, entity, public_id, op, payload_json, ts_utc
             FROM change_feed
             WHERE token > ?1 AND source_terminal != ?2
             ORDER BY token ASC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![since, terminal_id, limit as i64], row_to_envelope)?;

        let mut changes = Vec::new();
        for row in rows {
            changes.push(
                row.map_err(|e| ServerError::Database(format!("读取 feed 记录失败: {}", e)))?,
            );
        }
        debug!(
            "pull 查询: terminal={}, since={}, 返回 {} 条",
            terminal_id,
            since,
            changes.len()
        );
        Ok(changes)
    }

    /// feed 当前高水位（空 feed 为 0）
    pub async fn high_watermark(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        let token: i64 = conn.query_row(
            "SELECT COALESCE(MAX(token), 0) FROM change_feed",
            [],
            |row| row.get(0),
        )?;
        Ok(token)
    }

    /// 某终端已成功推送的最高 token（从未推送过返回 0）
    pub async fn cursor(&self, terminal_id: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        // 只有「无此终端行」折算为 0，存储失败照常上抛
        let token: Option<i64> = conn
            .query_row(
                "SELECT last_token FROM terminal_cursors WHERE terminal_id = ?1",
                [terminal_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(token.unwrap_or(0))
    }
}

/// 取新 token 插入一条 feed 记录
///
/// token 唯一冲突只可能出现在多个发号器实例并存时（如服务器重启且时钟回拨
/// 而水位恢复失效），同事务内取新 token 重试至多 TOKEN_INSERT_RETRIES 次；
/// 仍失败即中止整个事务，保持整批全有或全无。
fn insert_with_fresh_token(
    tx: &Transaction<'_>,
    tokens: &TokenGenerator,
    source_terminal: &str,
    entity: EntityKind,
    op: ChangeOp,
    wire: &WireChange,
) -> Result<i64> {
    let mut attempts = 0u32;
    loop {
        let token = tokens.next_token();
        let result = tx.execute(
            "INSERT INTO change_feed
                 (token, entity, public_id, op, payload_json, ts_utc, source_terminal)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                token,
                entity.as_str(),
                wire.public_id.to_string(),
                op.as_u8(),
                wire.payload_json,
                wire.ts_utc.to_rfc3339(),
                source_terminal,
            ],
        );
        match result {
            Ok(_) => return Ok(token),
            Err(e) if is_unique_violation(&e) => {
                attempts += 1;
                if attempts >= TOKEN_INSERT_RETRIES {
                    return Err(ServerError::TokenRegression(format!(
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
    use chrono::Utc;

    fn wire_upsert(entity: &str, public_id: Uuid, payload: &str) -> WireChange {
        WireChange {
            entity: entity.to_string(),
            public_id,
            op: 0,
            payload_json: payload.to_string(),
            ts_utc: Utc::now(),
            token: None,
        }
    }

    fn wire_delete(entity: &str, public_id: Uuid) -> WireChange {
        WireChange {
            entity: entity.to_string(),
            public_id,
            op: 1,
            payload_json: String::new(),
            ts_utc: Utc::now(),
            token: None,
        }
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_tokens_and_cursor() {
        let feed = ChangeFeed::open_in_memory().await.unwrap();
        let id = Uuid::new_v4();

        let ack1 = feed
            .append("till-a", &[wire_upsert("sale", id, r#"{"v":1}"#)])
            .await
            .unwrap();
        let ack2 = feed
            .append(
                "till-a",
                &[
                    wire_upsert("sale", id, r#"{"v":2}"#),
                    wire_delete("sale", id),
                ],
            )
            .await
            .unwrap();

        assert_eq!(ack1.accepted, 1);
        assert_eq!(ack2.accepted, 2);
        assert!(ack2.last_token > ack1.last_token);

        // 游标 = 该终端推送水位，与追加同事务推进
        assert_eq!(feed.cursor("till-a").await.unwrap(), ack2.last_token);
        assert_eq!(feed.cursor("till-b").await.unwrap(), 0);
        assert_eq!(feed.high_watermark().await.unwrap(), ack2.last_token);
    }

    #[tokio::test]
    async fn test_cursor_zero_for_unknown_but_errors_surface() {
        let feed = ChangeFeed::open_in_memory().await.unwrap();
        // 从未推送过的终端是正常情况，折算为 0
        assert_eq!(feed.cursor("till-never").await.unwrap(), 0);

        // 存储失败不得伪装成 0
        {
            let conn = feed.conn.lock().await;
            conn.execute_batch("DROP TABLE terminal_cursors").unwrap();
        }
        assert!(feed.cursor("till-never").await.is_err());
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let feed = ChangeFeed::open_in_memory().await.unwrap();
        let err = feed.append("till-a", &[]).await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidBatch(_)));
    }

    #[tokio::test]
    async fn test_malformed_batch_rejected_whole() {
        let feed = ChangeFeed::open_in_memory().await.unwrap();
        let good = wire_upsert("sale", Uuid::new_v4(), r#"{"v":1}"#);
        let bad = wire_upsert("gift_card", Uuid::new_v4(), "{}");

        let err = feed.append("till-a", &[good, bad]).await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidBatch(_)));
        // 绝不部分应用
        assert_eq!(feed.high_watermark().await.unwrap(), 0);
        assert_eq!(feed.cursor("till-a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_self_echo_suppression() {
        let feed = ChangeFeed::open_in_memory().await.unwrap();
        let id = Uuid::new_v4();
        feed.append("till-a", &[wire_upsert("item", id, r#"{"v":1}"#)])
            .await
            .unwrap();

        // 自己的变更不回流，即使 token 高于 since
        let own = feed.changes_since("till-a", 0, 100).await.unwrap();
        assert!(own.is_empty());

        let others = feed.changes_since("till-b", 0, 100).await.unwrap();
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].public_id, id);
    }

    #[tokio::test]
    async fn test_changes_since_ordered_and_capped() {
        let feed = ChangeFeed::open_in_memory().await.unwrap();
        for i in 0..5 {
            feed.append(
                "till-a",
                &[wire_upsert("sale", Uuid::new_v4(), &format!(r#"{{"n":{}}}"#, i))],
            )
            .await
            .unwrap();
        }

        let page = feed.changes_since("till-b", 0, 3).await.unwrap();
        assert_eq!(page.len(), 3);
        assert!(page.windows(2).all(|w| w[0].token < w[1].token));

        // 从上一页末尾继续
        let rest = feed
            .changes_since("till-b", page[2].token, 100)
            .await
            .unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test]
    async fn test_batch_atomicity_on_rollback() {
        let feed = ChangeFeed::open_in_memory().await.unwrap();
        let tokens = feed.tokens.clone();

        // 模拟批中途失败：同一事务写入部分行后回滚，feed 必须是 0 行而不是部分行
        {
            let conn = feed.conn.lock().await;
            let tx = conn.unchecked_transaction().unwrap();
            for i in 0..3 {
                insert_with_fresh_token(
                    &tx,
                    &tokens,
                    "till-a",
                    EntityKind::Sale,
                    ChangeOp::Upsert,
                    &wire_upsert("sale", Uuid::new_v4(), &format!(r#"{{"n":{}}}"#, i)),
                )
                .unwrap();
            }
            drop(tx); // 未 commit → 回滚
        }

        assert_eq!(feed.high_watermark().await.unwrap(), 0);
        assert!(feed.changes_since("till-b", 0, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_push_is_harmless_reappend() {
        let feed = ChangeFeed::open_in_memory().await.unwrap();
        let id = Uuid::new_v4();
        let batch = vec![wire_upsert("voucher", id, r#"{"amount":50}"#)];

        // 至少一次语义：确认丢失后整批重发，服务器当作冗余但收敛的追加
        let ack1 = feed.append("till-a", &batch).await.unwrap();
        let ack2 = feed.append("till-a", &batch).await.unwrap();
        assert!(ack2.last_token > ack1.last_token);

        let changes = feed.changes_since("till-b", 0, 100).await.unwrap();
        assert_eq!(changes.len(), 2);
        // 两条快照内容相同，按最高 token 胜出规则收敛到同一状态
        assert_eq!(changes[0].payload_json, changes[1].payload_json);
    }
}
