//! 订单服务错误类型

use mall_shared::error::MallError;
use thiserror::Error;

use crate::models::OrderStatus;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("订单不存在: {0}")]
    OrderNotFound(String),

    /// 订单已处于其他终态，拒绝迁移
    #[error("订单状态不允许此操作: sn={sn}, current={current}, target={target}")]
    InvalidOrderStatus {
        sn: String,
        current: OrderStatus,
        target: OrderStatus,
    },

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Shared(#[from] MallError),
}

pub type Result<T> = std::result::Result<T, OrderError>;

impl OrderError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(_) => true,
            Self::Shared(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::InvalidOrderStatus { .. } => "INVALID_ORDER_STATUS",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Shared(e) => e.code(),
        }
    }
}

/// 消费循环只认识共享错误类型
impl From<OrderError> for MallError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::Shared(e) => e,
            OrderError::Database(e) => MallError::Database(e),
            OrderError::OrderNotFound(sn) => MallError::NotFound {
                entity: "order".to_string(),
                id: sn,
            },
            OrderError::Validation(msg) => MallError::Validation(msg),
            other => MallError::Internal(other.to_string()),
        }
    }
}
