//! Pull 客户端 - 服务器 → 终端
//!
//! 以本地游标为起点分页拉取，逐条应用并推进游标，直到追平服务器高水位。
//! 服务器侧已做自回声抑制（不返回本终端自己的变更），这里拿到什么应用什么。

use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::HttpClientConfig;
use crate::error::{Result, TillsyncError};
use crate::replicate::push::build_client;
use crate::storage::Inbox;
use tillsync_core::{ChangeEnvelope, PullResponse};

/// 单次 pull（含分页循环）的结果
#[derive(Debug, Clone, Copy)]
pub struct PullOutcome {
    /// 本次应用的变更条数
    pub applied: usize,
    /// 服务器当前高水位
    pub server_token: i64,
}

/// Pull 客户端
pub struct PullClient {
    client: Client,
    base_url: String,
    terminal_id: String,
    inbox: Inbox,
}

impl PullClient {
    pub fn new(
        http: &HttpClientConfig,
        base_url: &str,
        terminal_id: &str,
        inbox: Inbox,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(http)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            terminal_id: terminal_id.to_string(),
            inbox,
        })
    }

    /// 拉取并应用所有高于本地游标的服务器变更（分页直到追平高水位）
    pub async fn pull_once(&self, max_batch: u32) -> Result<PullOutcome> {
        let mut total = 0usize;

        loop {
            let since = self.inbox.last_applied_token().await?;
            let page = self.fetch_page(since, max_batch).await?;

            if page.changes.is_empty() {
                debug!("pull 追平: since={}, server_token={}", since, page.server_token);
                return Ok(PullOutcome { applied: total, server_token: page.server_token });
            }

            let envelopes = decode_page(&page)?;
            total += self.inbox.apply_changes(&envelopes).await?;

            let last_applied = envelopes.last().map(|env| env.token).unwrap_or(since);
            debug!(
                "pull 已应用一页: {} 条, last={}, 高水位={}",
                envelopes.len(),
                last_applied,
                page.server_token
            );
            if last_applied >= page.server_token {
                info!("pull 完成: 共应用 {} 条, server_token={}", total, page.server_token);
                return Ok(PullOutcome { applied: total, server_token: page.server_token });
            }
        }
    }

    async fn fetch_page(&self, since: i64, max: u32) -> Result<PullResponse> {
        let url = format!("{}/sync/pull", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("terminalId", self.terminal_id.as_str()),
                ("since", &since.to_string()),
                ("max", &max.to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TillsyncError::Server(format!(
                "pull 被拒绝: HTTP {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }
}

/// 线上变更 → 信封
///
/// entity / op / token 任何一项缺失或未知都按协议错误整页拒绝，
/// 游标停在失败条目之前，下个周期重拉同一页而不是静默跳过。
fn decode_page(page: &PullResponse) -> Result<Vec<ChangeEnvelope>> {
    let mut envelopes = Vec::with_capacity(page.changes.len());
    for wire in &page.changes {
        let entity = wire.entity_kind().ok_or_else(|| {
            warn!("pull 响应含未知实体: {}", wire.entity);
            TillsyncError::InvalidInput(format!("未知实体: {}", wire.entity))
        })?;
        let op = wire
            .change_op()
            .ok_or_else(|| TillsyncError::InvalidInput(format!("无效的 Op 枚举值: {}", wire.op)))?;
        let token = wire
            .token
            .ok_or_else(|| TillsyncError::InvalidInput("pull 变更缺少 Token".to_string()))?;

        envelopes.push(ChangeEnvelope {
            entity,
            public_id: wire.public_id,
            op,
            payload_json: wire.payload_json.clone(),
            ts_utc: wire.ts_utc,
            token,
        });
    }
    Ok(envelopes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tillsync_core::WireChange;
    use uuid::Uuid;

    #[test]
    fn test_decode_page_rejects_missing_token() {
        let page = PullResponse {
            changes: vec![WireChange {
                entity: "sale".to_string(),
                public_id: Uuid::new_v4(),
                op: 0,
                payload_json: "{}".to_string(),
                ts_utc: Utc::now(),
                token: None,
            }],
            server_token: 10,
        };
        assert!(decode_page(&page).is_err());
    }

    #[test]
    fn test_decode_page_rejects_unknown_entity() {
        let page = PullResponse {
            changes: vec![WireChange {
                entity: "gift_card".to_string(),
                public_id: Uuid::new_v4(),
                op: 0,
                payload_json: "{}".to_string(),
                ts_utc: Utc::now(),
                token: Some(1),
            }],
            server_token: 1,
        };
        assert!(decode_page(&page).is_err());
    }

    #[test]
    fn test_decode_page_preserves_order() {
        let id = Uuid::new_v4();
        let page = PullResponse {
            changes: vec![
                WireChange {
                    entity: "item".to_string(),
                    public_id: id,
                    op: 0,
                    payload_json: r#"{"v":1}"#.to_string(),
                    ts_utc: Utc::now(),
                    token: Some(101),
                },
                WireChange {
                    entity: "item".to_string(),
                    public_id: id,
                    op: 1,
                    payload_json: String::new(),
                    ts_utc: Utc::now(),
                    token: Some(102),
                },
            ],
            server_token: 102,
        };
        let envelopes = decode_page(&page).unwrap();
        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[0].token, 101);
        assert_eq!(envelopes[1].token, 102);
    }
}
