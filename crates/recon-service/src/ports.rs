//! 对账依赖的订单与支付能力
//!
//! 对账只需要两个服务的一小部分操作，抽成 trait 便于用内存实现模拟并发写入。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use order::{Order, OrderService};
use payment::{Payment, PaymentService};

use crate::error::Result;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait OrderClient: Send + Sync {
    /// 已关联支付但在 `ctime` 之前创建、仍为 Processing 的订单
    async fn find_timeout_orders(
        &self,
        offset: i64,
        limit: i64,
        ctime: DateTime<Utc>,
    ) -> Result<(Vec<Order>, i64)>;

    async fn find_order_by_uid_and_sn(&self, buyer_id: i64, sn: &str) -> Result<Order>;

    async fn succeed_order(&self, buyer_id: i64, sn: &str) -> Result<()>;

    async fn fail_order(&self, buyer_id: i64, sn: &str) -> Result<()>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait PaymentClient: Send + Sync {
    async fn find_payment_by_id(&self, id: i64) -> Result<Payment>;

    /// 强制置为失败；支付单已被终结时把最新状态回填到 `payment`
    async fn set_payment_status_paid_failed(&self, payment: &mut Payment) -> Result<()>;

    async fn handle_credit_callback(&self, payment: &Payment) -> Result<()>;
}

#[async_trait]
impl OrderClient for OrderService {
    async fn find_timeout_orders(
        &self,
        offset: i64,
        limit: i64,
        ctime: DateTime<Utc>,
    ) -> Result<(Vec<Order>, i64)> {
        Ok(OrderService::find_timeout_orders(self, offset, limit, ctime).await?)
    }

    async fn find_order_by_uid_and_sn(&self, buyer_id: i64, sn: &str) -> Result<Order> {
        Ok(OrderService::find_order_by_uid_and_sn(self, buyer_id, sn).await?)
    }

    async fn succeed_order(&self, buyer_id: i64, sn: &str) -> Result<()> {
        Ok(OrderService::succeed_order(self, buyer_id, sn).await?)
    }

    async fn fail_order(&self, buyer_id: i64, sn: &str) -> Result<()> {
        Ok(OrderService::fail_order(self, buyer_id, sn).await?)
    }
}

#[async_trait]
impl PaymentClient for PaymentService {
    async fn find_payment_by_id(&self, id: i64) -> Result<Payment> {
        Ok(PaymentService::find_payment_by_id(self, id).await?)
    }

    async fn set_payment_status_paid_failed(&self, payment: &mut Payment) -> Result<()> {
        Ok(PaymentService::set_payment_status_paid_failed(self, payment).await?)
    }

    async fn handle_credit_callback(&self, payment: &Payment) -> Result<()> {
        Ok(PaymentService::handle_credit_callback(self, payment).await?)
    }
}
