use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rusqlite;

#[derive(Debug)]
pub enum ServerError {
    SqliteError(rusqlite::Error),
    Database(String),
    Migration(String),
    IO(String),
    InvalidBatch(String),    // 畸形批次：同步拒绝，绝不部分应用
    TokenRegression(String), // 逻辑时钟回退，致命且不可恢复
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::SqliteError(e) => write!(f, "SQLite error: {}", e),
            ServerError::Database(e) => write!(f, "Database error: {}", e),
            ServerError::Migration(e) => write!(f, "Migration error: {}", e),
            ServerError::IO(e) => write!(f, "IO error: {}", e),
            ServerError::InvalidBatch(e) => write!(f, "Invalid batch: {}", e),
            ServerError::TokenRegression(e) => write!(f, "Token regression: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<rusqlite::Error> for ServerError {
    fn from(error: rusqlite::Error) -> Self {
        ServerError::SqliteError(error)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(error: std::io::Error) -> Self {
        ServerError::IO(error.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            // 畸形批次是客户端错误，同步拒绝
            ServerError::InvalidBatch(m) => (StatusCode::BAD_REQUEST, m.clone()),
            // 其余都是存储/内部失败：整批被拒，客户端稍后原样重试
            _ => {
                tracing::error!("请求处理失败: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
