//! Push 客户端 - 终端 → 服务器
//!
//! 至少一次语义：确认前的崩溃或网络失败会让同一批在下次尝试时原样重发，
//! 服务器把重复 push 当作无害的冗余追加接受（快照日志收敛），不要求恰好一次。
//! 请求失败时本地状态完全不动，重试永远安全。

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info};

use crate::config::HttpClientConfig;
use crate::error::{Result, TillsyncError};
use crate::storage::Outbox;
use tillsync_core::{PushRequest, PushResponse, WireChange};

/// 单次 push 的结果
#[derive(Debug, Clone, Copy)]
pub struct PushOutcome {
    /// 本次确认的信封条数
    pub pushed: usize,
    /// 服务器为本批分配的最后一个全局 token（空批为 None）
    pub server_token: Option<i64>,
}

/// Push 客户端
pub struct PushClient {
    client: Client,
    base_url: String,
    terminal_id: String,
    outbox: Outbox,
}

impl PushClient {
    pub fn new(
        http: &HttpClientConfig,
        base_url: &str,
        terminal_id: &str,
        outbox: Outbox,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(http)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            terminal_id: terminal_id.to_string(),
            outbox,
        })
    }

    /// 推送一批未确认信封；成功后标记本地 token 区间已确认
    pub async fn push_once(&self, batch_size: usize) -> Result<PushOutcome> {
        let pending = self.outbox.pending_batch(batch_size).await?;
        let Some(last) = pending.last() else {
            debug!("发件箱为空，无需推送");
            return Ok(PushOutcome { pushed: 0, server_token: None });
        };
        let last_local_token = last.token;

        let request = PushRequest {
            terminal_id: self.terminal_id.clone(),
            changes: pending
                .iter()
                .map(|env| WireChange::from_envelope(env, false))
                .collect(),
        };

        let url = format!("{}/sync/push", self.base_url);
        let response = self.client.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            // 整批被拒，本地状态不动，下个周期原样重发
            return Err(TillsyncError::Server(format!(
                "push 被拒绝: HTTP {}",
                response.status()
            )));
        }
        let ack: PushResponse = response.json().await?;

        self.outbox.mark_acked(last_local_token).await?;
        info!(
            "push 完成: {} 条已确认, server_token={}",
            ack.accepted, ack.server_token
        );

        Ok(PushOutcome {
            pushed: ack.accepted as usize,
            server_token: Some(ack.server_token),
        })
    }
}

/// 按配置构造 reqwest 客户端
pub(crate) fn build_client(config: &HttpClientConfig) -> Result<Client> {
    let mut builder = Client::builder();

    if let Some(timeout) = config.connect_timeout_secs {
        builder = builder.connect_timeout(Duration::from_secs(timeout));
    }
    if let Some(timeout) = config.request_timeout_secs {
        builder = builder.timeout(Duration::from_secs(timeout));
    }

    builder
        .build()
        .map_err(|e| TillsyncError::Config(format!("创建 HTTP 客户端失败: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStore;

    #[tokio::test]
    async fn test_push_empty_outbox_is_noop() {
        let store = LocalStore::open_in_memory("till-01").await.unwrap();
        // 服务器不可达也无妨：空发件箱根本不会发请求
        let push = PushClient::new(
            &HttpClientConfig::default(),
            "http://127.0.0.1:9",
            "till-01",
            store.outbox(),
        )
        .unwrap();

        let outcome = push.push_once(100).await.unwrap();
        assert_eq!(outcome.pushed, 0);
        assert!(outcome.server_token.is_none());
    }

    #[tokio::test]
    async fn test_push_failure_leaves_outbox_untouched() {
        let store = LocalStore::open_in_memory("till-01").await.unwrap();
        let outbox = store.outbox();
        outbox
            .enqueue_upsert(
                tillsync_core::EntityKind::Sale,
                uuid::Uuid::new_v4(),
                &serde_json::json!({"total": 10}),
            )
            .await
            .unwrap();

        // 端口 9（discard）连不上，push 必须失败且不确认任何信封
        let push = PushClient::new(
            &HttpClientConfig {
                connect_timeout_secs: Some(1),
                request_timeout_secs: Some(1),
            },
            "http://127.0.0.1:9",
            "till-01",
            outbox.clone(),
        )
        .unwrap();

        assert!(push.push_once(100).await.is_err());
        assert_eq!(outbox.pending_count().await.unwrap(), 1);
    }
}
