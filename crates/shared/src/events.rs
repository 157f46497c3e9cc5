//! 跨服务事件模型
//!
//! 定义消息总线上传输的事件负载。字段名与既有 JSON 协议保持一致
//! （`orderSN`、`payerID` 等），状态以数字编码传输。

use serde::{Deserialize, Serialize};

/// 支付状态
///
/// 既是支付单的持久化状态，也是 `PaymentEvent` 的线上协议字段，
/// 因此放在共享库中供订单服务解析。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(into = "u8", try_from = "u8")]
#[repr(i16)]
pub enum PaymentStatus {
    Unpaid = 1,
    Processing = 2,
    PaidSuccess = 3,
    PaidFailed = 4,
    Refund = 5,
    TimeoutClosed = 6,
}

impl PaymentStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// 尚未得到最终结果
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Unpaid | Self::Processing)
    }

    /// 失败类终态：需要取消积分预扣、订单走失败路径
    pub fn is_failure(self) -> bool {
        matches!(self, Self::PaidFailed | Self::TimeoutClosed)
    }
}

impl From<PaymentStatus> for u8 {
    fn from(status: PaymentStatus) -> Self {
        status.code()
    }
}

impl TryFrom<u8> for PaymentStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Unpaid),
            2 => Ok(Self::Processing),
            3 => Ok(Self::PaidSuccess),
            4 => Ok(Self::PaidFailed),
            5 => Ok(Self::Refund),
            6 => Ok(Self::TimeoutClosed),
            other => Err(format!("未知的支付状态: {other}")),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unpaid => "UNPAID",
            Self::Processing => "PROCESSING",
            Self::PaidSuccess => "PAID_SUCCESS",
            Self::PaidFailed => "PAID_FAILED",
            Self::Refund => "REFUND",
            Self::TimeoutClosed => "TIMEOUT_CLOSED",
        };
        write!(f, "{s}")
    }
}

/// 支付结果事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    #[serde(rename = "orderSN")]
    pub order_sn: String,
    #[serde(rename = "payerID")]
    pub payer_id: i64,
    pub status: PaymentStatus,
}

/// 订单中的商品及数量
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEventSpu {
    pub id: i64,
    pub cnt: i32,
}

/// 订单完成事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    #[serde(rename = "orderSN")]
    pub order_sn: String,
    #[serde(rename = "buyerID")]
    pub buyer_id: i64,
    pub spus: Vec<OrderEventSpu>,
}

/// 要求完成订单的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteOrderEvent {
    pub sn: String,
    #[serde(rename = "buyerId")]
    pub buyer_id: i64,
}
