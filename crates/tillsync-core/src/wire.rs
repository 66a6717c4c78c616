//! 线协议 DTO - push / pull / health 的 HTTP JSON 结构
//!
//! 字段名与上游线格式一致（PascalCase）。entity 在线上以字符串传输、
//! op 以 int 枚举传输，两端各自在边界处解析为受控枚举。

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::{ChangeEnvelope, ChangeOp, EntityKind};

/// pull 未指定 max 时的默认批大小
pub const DEFAULT_PULL_LIMIT: u32 = 500;

/// pull 单次批大小上限（请求再大也收敛到此值）
pub const MAX_PULL_LIMIT: u32 = 5000;

/// 归一化 pull 批大小：缺省取 500，上限 5000，下限 1
pub fn clamp_pull_limit(max: Option<u32>) -> u32 {
    max.unwrap_or(DEFAULT_PULL_LIMIT).clamp(1, MAX_PULL_LIMIT)
}

/// 线上的单条变更
///
/// push 请求不携带 token（全局 token 由服务器分配）；
/// pull 响应携带服务器 token，客户端逐条推进游标时使用。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireChange {
    pub entity: String,
    pub public_id: Uuid,
    pub op: u8,
    pub payload_json: String,
    pub ts_utc: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<i64>,
}

impl WireChange {
    /// 由信封构造线上变更；`with_token` 为真时携带信封 token（pull 响应路径）
    pub fn from_envelope(env: &ChangeEnvelope, with_token: bool) -> Self {
        Self {
            entity: env.entity.as_str().to_string(),
            public_id: env.public_id,
            op: env.op.as_u8(),
            payload_json: env.payload_json.clone(),
            ts_utc: env.ts_utc,
            token: with_token.then_some(env.token),
        }
    }

    /// 解析受控实体枚举；未知实体名返回 None（边界处拒绝）
    pub fn entity_kind(&self) -> Option<EntityKind> {
        EntityKind::from_str(&self.entity).ok()
    }

    /// 解析操作枚举；无效枚举值返回 None（边界处拒绝）
    pub fn change_op(&self) -> Option<ChangeOp> {
        ChangeOp::from_u8(self.op)
    }
}

/// POST /sync/push 请求体
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PushRequest {
    pub terminal_id: String,
    pub changes: Vec<WireChange>,
}

/// POST /sync/push 响应体
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PushResponse {
    /// 本批被接受的条数
    pub accepted: u32,
    /// 本批分配的最后一个全局 token
    pub server_token: i64,
}

/// GET /sync/pull 响应体
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PullResponse {
    /// 按服务器 token 升序排列的变更
    pub changes: Vec<WireChange>,
    /// 当前服务器变更日志的高水位
    pub server_token: i64,
}

/// GET /health 响应体（存活探针，字段名保持小写）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub utc: DateTime<Utc>,
}
