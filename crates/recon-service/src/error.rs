//! 对账服务错误类型

use order::OrderError;
use payment::PaymentError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconError {
    #[error("订单服务错误: {0}")]
    Order(#[from] OrderError),

    #[error("支付服务错误: {0}")]
    Payment(#[from] PaymentError),
}

pub type Result<T> = std::result::Result<T, ReconError>;

impl ReconError {
    /// 订单已处于与支付结果矛盾的终态，重试不会改变结果，需要人工介入
    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, Self::Order(OrderError::InvalidOrderStatus { .. }))
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Order(e) => e.error_code(),
            Self::Payment(e) => e.error_code(),
        }
    }
}
