//! 变更信封与受控实体枚举
//!
//! EntityKind 为受控枚举：可复制的聚合类型是封闭集合，新增种类需终端与服务器
//! 同步升级。信封一旦写入日志即不可变，只读、只重放，不更新、不删除。

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 复制操作（线上 int 枚举：0=Upsert, 1=Delete）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ChangeOp {
    /// 整体快照写入（payload 为聚合的全量 JSON 快照，非增量 diff）
    Upsert = 0,
    /// 删除（payload 为空）
    Delete = 1,
}

impl ChangeOp {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Upsert),
            1 => Some(Self::Delete),
            _ => None,
        }
    }
}

impl From<ChangeOp> for u8 {
    fn from(op: ChangeOp) -> Self {
        op.as_u8()
    }
}

impl TryFrom<u8> for ChangeOp {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        ChangeOp::from_u8(v).ok_or_else(|| format!("无效的 Op 枚举值: {}", v))
    }
}

/// 可复制的领域聚合类型（受控枚举，与服务器一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Item,
    Customer,
    Supplier,
    Sale,
    Purchase,
    StockMovement,
    Voucher,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::Customer => "customer",
            Self::Supplier => "supplier",
            Self::Sale => "sale",
            Self::Purchase => "purchase",
            Self::StockMovement => "stock_movement",
            Self::Voucher => "voucher",
        }
    }
}

impl FromStr for EntityKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "item" => Ok(Self::Item),
            "customer" => Ok(Self::Customer),
            "supplier" => Ok(Self::Supplier),
            "sale" => Ok(Self::Sale),
            "purchase" => Ok(Self::Purchase),
            "stock_movement" => Ok(Self::StockMovement),
            "voucher" => Ok(Self::Voucher),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 变更信封：复制的最小单元
///
/// - `public_id` 为聚合实例的全局稳定标识（创建时分配一次，永不复用），
///   与本地自增行号无关
/// - `ts_utc` 为写入时的墙上时钟，仅供展示，永不参与排序
/// - `token` 为日志内唯一且严格递增的 64 位排序值：终端侧为本地 token，
///   服务器侧为全局 token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEnvelope {
    pub entity: EntityKind,
    pub public_id: Uuid,
    pub op: ChangeOp,
    pub payload_json: String,
    pub ts_utc: DateTime<Utc>,
    pub token: i64,
}

impl ChangeEnvelope {
    /// 构造 Upsert 信封（payload 为聚合的全量快照）
    pub fn upsert(entity: EntityKind, public_id: Uuid, payload_json: String, token: i64) -> Self {
        Self {
            entity,
            public_id,
            op: ChangeOp::Upsert,
            payload_json,
            ts_utc: Utc::now(),
            token,
        }
    }

    /// 构造 Delete 信封（payload 为空）
    pub fn delete(entity: EntityKind, public_id: Uuid, token: i64) -> Self {
        Self {
            entity,
            public_id,
            op: ChangeOp::Delete,
            payload_json: String::new(),
            ts_utc: Utc::now(),
            token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn entity_kind_as_str_and_from_str() {
        assert_eq!(EntityKind::Sale.as_str(), "sale");
        assert_eq!(EntityKind::StockMovement.as_str(), "stock_movement");
        assert_eq!(EntityKind::from_str("item").unwrap(), EntityKind::Item);
        assert_eq!(
            EntityKind::from_str("stock_movement").unwrap(),
            EntityKind::StockMovement
        );
        assert!(EntityKind::from_str("unknown").is_err());
    }

    #[test]
    fn change_op_wire_values() {
        // 线协议固定 0=Upsert, 1=Delete
        assert_eq!(ChangeOp::Upsert.as_u8(), 0);
        assert_eq!(ChangeOp::Delete.as_u8(), 1);
        assert_eq!(ChangeOp::from_u8(0), Some(ChangeOp::Upsert));
        assert_eq!(ChangeOp::from_u8(1), Some(ChangeOp::Delete));
        assert_eq!(ChangeOp::from_u8(2), None);

        // serde 按 int 编解码
        assert_eq!(serde_json::to_string(&ChangeOp::Upsert).unwrap(), "0");
        let op: ChangeOp = serde_json::from_str("1").unwrap();
        assert_eq!(op, ChangeOp::Delete);
        assert!(serde_json::from_str::<ChangeOp>("7").is_err());
    }

    #[test]
    fn delete_envelope_has_empty_payload() {
        let env = ChangeEnvelope::delete(EntityKind::Item, Uuid::new_v4(), 42);
        assert_eq!(env.op, ChangeOp::Delete);
        assert!(env.payload_json.is_empty());
        assert_eq!(env.token, 42);
    }
}
