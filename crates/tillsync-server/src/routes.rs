//! HTTP 路由 - 推 / 拉 / 健康检查三个端点
//!
//! 协议为 JSON over HTTP：
//! - POST /sync/push   整批追加，200 返回 {Accepted, ServerToken}，非 200 整批被拒
//! - GET  /sync/pull   ?terminalId=&since=&max=  按 token 升序返回一页他端变更
//! - GET  /health      存活探针

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;

use crate::error::{Result, ServerError};
use crate::feed::ChangeFeed;
use tillsync_core::{
    clamp_pull_limit, HealthResponse, PullResponse, PushRequest, PushResponse, WireChange,
};

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub feed: Arc<ChangeFeed>,
}

/// 组装完整路由表
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/sync/push", post(push))
        .route("/sync/pull", get(pull))
        .route("/health", get(health))
        .with_state(state)
}

/// POST /sync/push - 整批原子追加一个终端的变更
pub async fn push(
    State(state): State<AppState>,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>> {
    if request.terminal_id.is_empty() {
        return Err(ServerError::InvalidBatch("TerminalId 不能为空".to_string()));
    }

    let ack = state.feed.append(&request.terminal_id, &request.changes).await?;
    Ok(Json(PushResponse {
        accepted: ack.accepted,
        server_token: ack.last_token,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PullQuery {
    #[serde(rename = "terminalId")]
    pub terminal_id: String,
    pub since: i64,
    pub max: Option<u32>,
}

/// GET /sync/pull - 自 since 起的一页他端变更 + feed 高水位
///
/// 返回的每条变更都带全局 token，终端逐条推进游标；
/// ServerToken 是 feed 高水位，供终端判断是否还有后续页。
pub async fn pull(
    State(state): State<AppState>,
    Query(query): Query<PullQuery>,
) -> Result<Json<PullResponse>> {
    if query.terminal_id.is_empty() {
        return Err(ServerError::InvalidBatch("terminalId 不能为空".to_string()));
    }

    let limit = clamp_pull_limit(query.max);
    let envelopes = state
        .feed
        .changes_since(&query.terminal_id, query.since, limit)
        .await?;
    let server_token = state.feed.high_watermark().await?;

    let changes = envelopes
        .iter()
        .map(|env| WireChange::from_envelope(env, true))
        .collect();

    Ok(Json(PullResponse {
        changes,
        server_token,
    }))
}

/// GET /health - 存活探针
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        utc: Utc::now(),
    })
}
