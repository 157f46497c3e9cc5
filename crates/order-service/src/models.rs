//! 订单领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// 订单状态
///
/// Init 表示已创建但尚未关联支付（超时后由关闭任务处理）；
/// Processing 表示已关联支付、等待结果（由对账任务兜底）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(into = "u8", try_from = "u8")]
#[repr(i16)]
pub enum OrderStatus {
    Init = 1,
    Processing = 2,
    Success = 3,
    Failed = 4,
    Canceled = 5,
    TimeoutClosed = 6,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Init | Self::Processing)
    }

    /// 可被条件迁移的非终态
    pub const PENDING: [OrderStatus; 2] = [Self::Init, Self::Processing];
}

impl From<OrderStatus> for u8 {
    fn from(status: OrderStatus) -> Self {
        status as u8
    }
}

impl TryFrom<u8> for OrderStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Init),
            2 => Ok(Self::Processing),
            3 => Ok(Self::Success),
            4 => Ok(Self::Failed),
            5 => Ok(Self::Canceled),
            6 => Ok(Self::TimeoutClosed),
            other => Err(format!("未知的订单状态: {other}")),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "INIT",
            Self::Processing => "PROCESSING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
            Self::TimeoutClosed => "TIMEOUT_CLOSED",
        };
        write!(f, "{s}")
    }
}

/// 订单项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct OrderItem {
    pub spu_id: i64,
    pub sku_id: i64,
    pub sku_name: String,
    pub quantity: i32,
    /// 原价（分）
    pub original_price: i64,
    /// 实付单价（分）
    pub real_price: i64,
}

/// 订单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: i64,
    pub sn: String,
    pub buyer_id: i64,
    pub payment_id: i64,
    pub payment_sn: String,
    pub original_total_amt: i64,
    pub real_total_amt: i64,
    pub status: OrderStatus,
    #[sqlx(skip)]
    pub items: Vec<OrderItem>,
    pub ctime: DateTime<Utc>,
    pub utime: DateTime<Utc>,
}

impl Order {
    /// 由订单项构造新订单，总价按订单项汇总
    pub fn new(buyer_id: i64, items: Vec<OrderItem>) -> Self {
        let now = Utc::now();
        let original_total_amt = items
            .iter()
            .map(|i| i.original_price * i64::from(i.quantity))
            .sum();
        let real_total_amt = items
            .iter()
            .map(|i| i.real_price * i64::from(i.quantity))
            .sum();

        Self {
            id: 0,
            sn: String::new(),
            buyer_id,
            payment_id: 0,
            payment_sn: String::new(),
            original_total_amt,
            real_total_amt,
            status: OrderStatus::Init,
            items,
            ctime: now,
            utime: now,
        }
    }
}

/// 生成订单号
pub fn new_order_sn() -> String {
    format!("ORD{}", Uuid::now_v7().simple())
}
