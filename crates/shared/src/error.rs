//! 统一错误处理模块
//!
//! 定义订单、支付、对账共享的错误类型。各服务在自己的错误枚举中
//! 以 `#[from]` 透传本类型，保持错误分类（校验 / 瞬时 / 重试耗尽）一致。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum MallError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    // ==================== 消息队列错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    // ==================== 验证错误 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),

    // ==================== 外部服务错误 ====================
    #[error("外部服务错误: {service} - {message}")]
    ExternalService { service: String, message: String },

    #[error("外部服务超时: {service}")]
    ExternalServiceTimeout { service: String },

    // ==================== 重试错误 ====================
    /// 重试预算耗尽，区别于"单次失败"
    #[error("超过最大重试次数: {operation} 共尝试 {attempts} 次, 最后一次错误: {last_error}")]
    ExceededMaxRetries {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    // ==================== 通用错误 ====================
    #[error("配置错误: {0}")]
    Config(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, MallError>;

impl MallError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::ExternalServiceTimeout { .. } => "EXTERNAL_SERVICE_TIMEOUT",
            Self::ExceededMaxRetries { .. } => "EXCEEDED_MAX_RETRIES",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 外部服务返回的业务失败同样视为可重试：积分服务的 try/confirm/cancel
    /// 以事务 ID 保证幂等，重复调用是安全的。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::Kafka(_)
                | Self::ExternalService { .. }
                | Self::ExternalServiceTimeout { .. }
        )
    }

    /// 是否为重试耗尽错误
    pub fn is_exceeded_max_retries(&self) -> bool {
        matches!(self, Self::ExceededMaxRetries { .. })
    }

    pub fn external(service: impl Into<String>, message: impl ToString) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = MallError::NotFound {
            entity: "Order".to_string(),
            id: "123".to_string(),
        };
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(
            MallError::Validation("缺少积分支付记录".to_string()).code(),
            "VALIDATION_ERROR"
        );
    }

    #[test]
    fn test_is_retryable() {
        let db_err = MallError::Database(sqlx::Error::PoolTimedOut);
        assert!(db_err.is_retryable());
        assert!(MallError::external("credit", "余额不足").is_retryable());

        assert!(!MallError::Validation("amount=0".to_string()).is_retryable());
        let exceeded = MallError::ExceededMaxRetries {
            operation: "try_deduct_credits".to_string(),
            attempts: 4,
            last_error: "timeout".to_string(),
        };
        assert!(!exceeded.is_retryable());
        assert!(exceeded.is_exceeded_max_retries());
    }

    #[test]
    fn test_exceeded_message() {
        let err = MallError::ExceededMaxRetries {
            operation: "confirm_deduct_credits".to_string(),
            attempts: 3,
            last_error: "连接被拒绝".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("超过最大重试次数"));
        assert!(msg.contains("confirm_deduct_credits"));
    }
}
