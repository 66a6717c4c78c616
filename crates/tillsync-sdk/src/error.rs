use std::fmt;
use rusqlite;

#[derive(Debug)]
pub enum TillsyncError {
    SqliteError(rusqlite::Error),
    JsonError(String),
    IO(String),
    Database(String),
    Migration(String),
    Config(String),
    InvalidInput(String),
    NotFound(String),
    Transport(String),      // 网络传输错误（瞬时，原样重试即可恢复）
    Server(String),         // 服务器拒绝（整批被拒，稍后重试）
    TokenRegression(String), // 逻辑时钟回退，致命且不可恢复
}

impl fmt::Display for TillsyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TillsyncError::SqliteError(e) => write!(f, "SQLite error: {}", e),
            TillsyncError::JsonError(e) => write!(f, "JSON error: {}", e),
            TillsyncError::IO(e) => write!(f, "IO error: {}", e),
            TillsyncError::Database(e) => write!(f, "Database error: {}", e),
            TillsyncError::Migration(e) => write!(f, "Migration error: {}", e),
            TillsyncError::Config(e) => write!(f, "Config error: {}", e),
            TillsyncError::InvalidInput(e) => write!(f, "Invalid input: {}", e),
            TillsyncError::NotFound(e) => write!(f, "Not found: {}", e),
            TillsyncError::Transport(e) => write!(f, "Transport error: {}", e),
            TillsyncError::Server(e) => write!(f, "Server error: {}", e),
            TillsyncError::TokenRegression(e) => write!(f, "Token regression: {}", e),
        }
    }
}

impl std::error::Error for TillsyncError {}

impl From<rusqlite::Error> for TillsyncError {
    fn from(error: rusqlite::Error) -> Self {
        TillsyncError::SqliteError(error)
    }
}

impl From<serde_json::Error> for TillsyncError {
    fn from(error: serde_json::Error) -> Self {
        TillsyncError::JsonError(error.to_string())
    }
}

impl From<std::io::Error> for TillsyncError {
    fn from(error: std::io::Error) -> Self {
        TillsyncError::IO(error.to_string())
    }
}

impl From<reqwest::Error> for TillsyncError {
    fn from(error: reqwest::Error) -> Self {
        TillsyncError::Transport(error.to_string())
    }
}

impl TillsyncError {
    /// 是否为瞬时错误：原样重试同一请求即可恢复，本地状态未被污染
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TillsyncError::Transport(_) | TillsyncError::Server(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TillsyncError>;
