//! 仓储 Trait 定义
//!
//! 服务层只依赖这里的抽象，测试时替换为 mock

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::Payment;

/// 支付单仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentRepositoryTrait: Send + Sync {
    /// 在同一事务内写入支付单及全部记录，返回带 ID 的支付单
    async fn create_payment(&self, payment: &Payment) -> Result<Payment>;

    /// 更新支付单状态与各渠道记录
    async fn update_payment(&self, payment: &Payment) -> Result<()>;

    /// 仅当支付单仍处于未决状态时置为失败，返回是否发生了迁移
    async fn mark_failed_if_pending(&self, id: i64) -> Result<bool>;

    /// 仅当支付单仍处于未决状态时写入终态及各渠道记录，返回是否写入成功
    async fn resolve_if_pending(&self, payment: &Payment) -> Result<bool>;

    async fn find_payment_by_id(&self, id: i64) -> Result<Option<Payment>>;
    async fn find_payment_by_sn(&self, sn: &str) -> Result<Option<Payment>>;
    async fn find_payment_by_order_sn(&self, order_sn: &str) -> Result<Option<Payment>>;

    /// 分页查询创建时间早于 ctime、仍未决且含微信记录的支付单，返回 (本页, 总数)
    async fn find_timeout_payments(
        &self,
        offset: i64,
        limit: i64,
        ctime: DateTime<Utc>,
    ) -> Result<(Vec<Payment>, i64)>;
}
