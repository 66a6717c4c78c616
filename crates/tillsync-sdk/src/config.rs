//! SDK 配置 - 终端同步参数与构建器

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tillsync_core::DEFAULT_PULL_LIMIT;

/// HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            // 单次尝试快速失败，离线/弱网下交给同步循环的退避重试
            connect_timeout_secs: Some(10),
            request_timeout_secs: Some(30),
        }
    }
}

/// 重试配置（同步循环失败后的指数退避）
///
/// 没有重试次数上限：长时间离线是预期状态而非异常，循环无限重试，
/// 只对退避间隔封顶。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// 基础延迟（毫秒）
    pub base_delay_ms: u64,
    /// 最大延迟（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避因子
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_factor: 2.0,
        }
    }
}

/// Tillsync SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// 数据存储目录
    pub data_dir: PathBuf,
    /// 同步服务器基础 URL，例如 http://sync.example.com:8686
    pub server_url: String,
    /// 终端标识（中心服务器以此区分各终端的游标）
    pub terminal_id: String,
    /// push 单批条数上限（限制请求体大小）
    pub push_batch_size: usize,
    /// pull 单批条数上限
    pub pull_batch_size: u32,
    /// 同步周期（秒）
    pub sync_interval_secs: u64,
    /// 重试配置
    pub retry: RetryConfig,
    /// HTTP 客户端配置
    pub http: HttpClientConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            server_url: "http://localhost:8686".to_string(),
            terminal_id: String::new(),
            push_batch_size: 200,
            pull_batch_size: DEFAULT_PULL_LIMIT,
            sync_interval_secs: 15,
            retry: RetryConfig::default(),
            http: HttpClientConfig::default(),
        }
    }
}

/// 获取默认数据目录 ~/.tillsync/
fn default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".tillsync")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        // Windows 支持
        home_dir.join(".tillsync")
    } else {
        PathBuf::from("./tillsync_data")
    }
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::new()
    }

    /// 校验必填项（终端标识与服务器地址）
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.terminal_id.trim().is_empty() {
            return Err(crate::error::TillsyncError::Config(
                "terminal_id 不能为空".to_string(),
            ));
        }
        if self.server_url.trim().is_empty() {
            return Err(crate::error::TillsyncError::Config(
                "server_url 不能为空".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tillsync SDK 配置构建器
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn server_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.server_url = url.into();
        self
    }

    pub fn terminal_id<S: Into<String>>(mut self, id: S) -> Self {
        self.config.terminal_id = id.into();
        self
    }

    pub fn push_batch_size(mut self, size: usize) -> Self {
        self.config.push_batch_size = size;
        self
    }

    pub fn pull_batch_size(mut self, size: u32) -> Self {
        self.config.pull_batch_size = size;
        self
    }

    pub fn sync_interval_secs(mut self, secs: u64) -> Self {
        self.config.sync_interval_secs = secs;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn http(mut self, http: HttpClientConfig) -> Self {
        self.config.http = http;
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
