//! 同步引擎 - 周期性串行执行 push + pull
//!
//! 职责：
//! - 同一终端的 push 与 pull 绝不并发（单把周期锁），避免游标写交错
//! - 周期循环 + 失败后指数退避（带抖动、有上限、无限重试）：
//!   长时间离线是预期状态，不设重试预算
//! - 维护同步健康状态（上次同步时间 / 上次错误 / 积压条数），
//!   只作后台状态展示，永不上抛为业务失败

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::{RetryConfig, SyncConfig};
use crate::error::Result;
use crate::replicate::pull::{PullClient, PullOutcome};
use crate::replicate::push::{PushClient, PushOutcome};
use crate::storage::{LocalStore, Outbox};

/// 同步健康状态（后台「上次同步」面板）
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SyncStatus {
    /// 上次成功同步的时间戳（毫秒）
    pub last_synced_at: Option<i64>,
    /// 上次失败的错误消息（成功后清空）
    pub last_error: Option<String>,
    /// 发件箱未确认条数
    pub pending_outbox: u64,
    /// 已应用的最高服务器 token
    pub last_server_token: i64,
}

/// 单个同步周期的结果
#[derive(Debug, Clone, Copy)]
pub struct SyncReport {
    pub push: PushOutcome,
    pub pull: PullOutcome,
}

/// 同步引擎
pub struct SyncEngine {
    push: PushClient,
    pull: PullClient,
    outbox: Outbox,
    config: SyncConfig,
    /// 周期锁：push / pull 对同一本地库串行
    cycle_lock: Mutex<()>,
    status: RwLock<SyncStatus>,
}

impl SyncEngine {
    /// 创建同步引擎（终端标识取自 store，与配置一致性由调用方保证）
    pub fn new(store: &LocalStore, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let push = PushClient::new(
            &config.http,
            &config.server_url,
            store.terminal_id(),
            store.outbox(),
        )?;
        let pull = PullClient::new(
            &config.http,
            &config.server_url,
            store.terminal_id(),
            store.inbox(),
        )?;
        Ok(Self {
            push,
            pull,
            outbox: store.outbox(),
            config,
            cycle_lock: Mutex::new(()),
            status: RwLock::new(SyncStatus::default()),
        })
    }

    /// 执行一个同步周期：先 push 后 pull，整个周期持有周期锁
    pub async fn run_cycle(&self) -> Result<SyncReport> {
        let _guard = self.cycle_lock.lock().await;

        let result: Result<SyncReport> = async {
            let push = self.push.push_once(self.config.push_batch_size).await?;
            let pull = self.pull.pull_once(self.config.pull_batch_size).await?;
            Ok(SyncReport { push, pull })
        }
        .await;

        let pending = self.outbox.pending_count().await.unwrap_or(0);
        let mut status = self.status.write().await;
        status.pending_outbox = pending;
        match &result {
            Ok(report) => {
                status.last_synced_at = Some(chrono::Utc::now().timestamp_millis());
                status.last_error = None;
                status.last_server_token = report.pull.server_token;
            }
            Err(e) => {
                status.last_error = Some(e.to_string());
            }
        }

        result
    }

    /// 当前同步健康状态
    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// 启动后台同步循环：成功按周期间隔，失败按指数退避（无限重试）
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let interval = Duration::from_secs(self.config.sync_interval_secs);
            let mut consecutive_failures = 0u32;

            info!(
                "同步循环已启动: interval={}s, server={}",
                self.config.sync_interval_secs, self.config.server_url
            );

            loop {
                match self.run_cycle().await {
                    Ok(report) => {
                        consecutive_failures = 0;
                        if report.push.pushed > 0 || report.pull.applied > 0 {
                            info!(
                                "同步周期完成: pushed={}, pulled={}",
                                report.push.pushed, report.pull.applied
                            );
                        }
                        tokio::time::sleep(interval).await;
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        let delay = backoff_delay(&self.config.retry, consecutive_failures);
                        warn!(
                            "同步周期失败 (连续第 {} 次): {}，{}ms 后重试",
                            consecutive_failures,
                            e,
                            delay.as_millis()
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        })
    }
}

/// 计算第 n 次连续失败后的退避延迟（指数 + 95%~105% 抖动，封顶 max_delay_ms）
fn backoff_delay(retry: &RetryConfig, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    let raw = retry.base_delay_ms as f64 * retry.backoff_factor.powi(exponent as i32);
    let capped = raw.min(retry.max_delay_ms as f64);
    // 随机抖动，避免同一门店的多台终端同时重试
    let jitter = rand::random::<f64>() * 0.1 + 0.95;
    Duration::from_millis((capped * jitter) as u64)
}
