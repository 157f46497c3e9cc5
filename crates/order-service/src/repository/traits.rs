//! 仓储 Trait 定义

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Order, OrderStatus};

/// 订单仓储接口
///
/// 所有写操作都以 (buyer_id, sn/id) 限定范围。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepositoryTrait: Send + Sync {
    /// 写入订单及订单项，返回带 ID 的订单
    async fn create_order(&self, order: &Order) -> Result<Order>;

    /// 关联支付单；仍为 Init 的订单同时迁移到 Processing。返回订单是否存在
    async fn update_order_payment_id_and_sn(
        &self,
        buyer_id: i64,
        order_id: i64,
        payment_id: i64,
        payment_sn: &str,
    ) -> Result<bool>;

    async fn find_order_by_uid_and_sn(&self, buyer_id: i64, sn: &str) -> Result<Option<Order>>;

    /// 无条件设置订单状态，返回订单是否存在
    async fn set_order_status(&self, buyer_id: i64, sn: &str, status: OrderStatus) -> Result<bool>;

    /// 仅当当前状态属于 `from` 时迁移到 `to`，返回是否发生了迁移
    async fn transition_order_status(
        &self,
        buyer_id: i64,
        sn: &str,
        from: &[OrderStatus],
        to: OrderStatus,
    ) -> Result<bool>;

    /// 分页查询指定状态、创建时间不晚于 ctime 的订单，返回 (本页, 总数)
    async fn find_orders_by_status(
        &self,
        status: OrderStatus,
        offset: i64,
        limit: i64,
        ctime: DateTime<Utc>,
    ) -> Result<(Vec<Order>, i64)>;

    /// 批量关闭仍为 Init 且创建时间不晚于 ctime 的订单，返回关闭数量
    async fn close_expired_orders(&self, ids: &[i64], ctime: DateTime<Utc>) -> Result<u64>;
}
