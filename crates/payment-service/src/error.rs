//! 支付服务错误类型
//!
//! 区分四类错误：校验错误（不重试）、瞬时错误（可重试）、
//! 重试耗尽（`Shared(ExceededMaxRetries)`）以及补偿相关的组合错误。

use mall_shared::error::MallError;
use thiserror::Error;

use crate::models::ChannelType;

/// 支付服务错误类型
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("支付单不存在: {0}")]
    PaymentNotFound(String),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("不支持的支付渠道: {0}")]
    UnsupportedChannel(ChannelType),

    /// 回调中的非终态交易状态，按约定忽略而不是当作失败
    #[error("忽略的微信交易状态: {trade_state}")]
    IgnoredTradeState { trade_state: String },

    #[error("未知的微信交易状态: {0}")]
    UnknownTradeState(String),

    #[error("积分预扣状态不允许此操作: tid={tid}, state={state}")]
    InvalidReservationState { tid: String, state: String },

    /// 主操作失败，补偿已成功执行
    #[error("{cause}（已执行补偿）")]
    Compensated { cause: Box<PaymentError> },

    /// 主操作失败，补偿也失败，需人工介入
    #[error("{cause}; 补偿同样失败: {compensation}")]
    CompensationFailed {
        cause: Box<PaymentError>,
        compensation: Box<PaymentError>,
    },

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Shared(#[from] MallError),
}

/// 支付服务 Result 类型别名
pub type Result<T> = std::result::Result<T, PaymentError>;

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(_) => true,
            Self::Shared(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// 是否为重试耗尽错误（包括作为补偿原因出现的情况）
    pub fn is_exceeded_max_retries(&self) -> bool {
        match self {
            Self::Shared(e) => e.is_exceeded_max_retries(),
            Self::Compensated { cause } => cause.is_exceeded_max_retries(),
            Self::CompensationFailed { cause, .. } => cause.is_exceeded_max_retries(),
            _ => false,
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::IgnoredTradeState { .. })
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::UnsupportedChannel(_) => "UNSUPPORTED_CHANNEL",
            Self::IgnoredTradeState { .. } => "IGNORED_TRADE_STATE",
            Self::UnknownTradeState(_) => "UNKNOWN_TRADE_STATE",
            Self::InvalidReservationState { .. } => "INVALID_RESERVATION_STATE",
            Self::Compensated { .. } => "COMPENSATED",
            Self::CompensationFailed { .. } => "COMPENSATION_FAILED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Shared(e) => e.code(),
        }
    }
}
