//! 订单生命周期服务
//!
//! `complete_order` 是唯一的无条件迁移（支付成功消息具有权威性）；
//! 其余迁移都只作用于非终态订单，并对相同目标状态的重复调用保持幂等。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::error::{OrderError, Result};
use crate::models::{Order, OrderStatus, new_order_sn};
use crate::repository::OrderRepositoryTrait;

pub struct OrderService {
    repo: Arc<dyn OrderRepositoryTrait>,
}

impl OrderService {
    pub fn new(repo: Arc<dyn OrderRepositoryTrait>) -> Self {
        Self { repo }
    }

    /// 创建订单，状态为 Init
    #[instrument(skip(self, order), fields(buyer_id = order.buyer_id))]
    pub async fn create_order(&self, mut order: Order) -> Result<Order> {
        if order.items.is_empty() {
            return Err(OrderError::Validation("订单项不能为空".to_string()));
        }
        if order.items.iter().any(|i| i.quantity <= 0) {
            return Err(OrderError::Validation("商品数量必须大于 0".to_string()));
        }
        if order.sn.is_empty() {
            order.sn = new_order_sn();
        }
        order.status = OrderStatus::Init;

        let created = self.repo.create_order(&order).await?;
        info!(order_sn = %created.sn, order_id = created.id, "订单已创建");
        Ok(created)
    }

    /// 关联支付单，订单进入 Processing
    pub async fn update_order_payment_id_and_sn(
        &self,
        buyer_id: i64,
        order_id: i64,
        payment_id: i64,
        payment_sn: &str,
    ) -> Result<()> {
        let found = self
            .repo
            .update_order_payment_id_and_sn(buyer_id, order_id, payment_id, payment_sn)
            .await?;
        if !found {
            return Err(OrderError::OrderNotFound(order_id.to_string()));
        }
        Ok(())
    }

    pub async fn find_order_by_uid_and_sn(&self, buyer_id: i64, sn: &str) -> Result<Order> {
        self.repo
            .find_order_by_uid_and_sn(buyer_id, sn)
            .await?
            .ok_or_else(|| OrderError::OrderNotFound(sn.to_string()))
    }

    /// 无条件置为成功
    #[instrument(skip(self))]
    pub async fn complete_order(&self, buyer_id: i64, sn: &str) -> Result<()> {
        if !self.repo.set_order_status(buyer_id, sn, OrderStatus::Success).await? {
            return Err(OrderError::OrderNotFound(sn.to_string()));
        }
        info!("订单已完成");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn succeed_order(&self, buyer_id: i64, sn: &str) -> Result<()> {
        self.transition(buyer_id, sn, OrderStatus::Success).await
    }

    #[instrument(skip(self))]
    pub async fn fail_order(&self, buyer_id: i64, sn: &str) -> Result<()> {
        self.transition(buyer_id, sn, OrderStatus::Failed).await
    }

    #[instrument(skip(self))]
    pub async fn cancel_order(&self, buyer_id: i64, sn: &str) -> Result<()> {
        self.transition(buyer_id, sn, OrderStatus::Canceled).await
    }

    /// 条件迁移；未生效时重读订单判断是重复调用还是状态冲突
    async fn transition(&self, buyer_id: i64, sn: &str, target: OrderStatus) -> Result<()> {
        if self
            .repo
            .transition_order_status(buyer_id, sn, &OrderStatus::PENDING, target)
            .await?
        {
            info!(%target, "订单状态已迁移");
            return Ok(());
        }

        let order = self.find_order_by_uid_and_sn(buyer_id, sn).await?;
        if order.status == target {
            return Ok(());
        }

        warn!(current = %order.status, %target, "订单已处于其他终态，拒绝迁移");
        Err(OrderError::InvalidOrderStatus {
            sn: sn.to_string(),
            current: order.status,
            target,
        })
    }

    /// 创建后一直未关联支付的订单
    pub async fn find_expired_orders(
        &self,
        offset: i64,
        limit: i64,
        ctime: DateTime<Utc>,
    ) -> Result<(Vec<Order>, i64)> {
        self.repo
            .find_orders_by_status(OrderStatus::Init, offset, limit, ctime)
            .await
    }

    /// 已关联支付但迟迟没有结果的订单
    pub async fn find_timeout_orders(
        &self,
        offset: i64,
        limit: i64,
        ctime: DateTime<Utc>,
    ) -> Result<(Vec<Order>, i64)> {
        self.repo
            .find_orders_by_status(OrderStatus::Processing, offset, limit, ctime)
            .await
    }

    /// 批量关闭超时未支付订单，返回实际关闭数量
    pub async fn close_expired_orders(&self, ids: &[i64], ctime: DateTime<Utc>) -> Result<u64> {
        self.repo.close_expired_orders(ids, ctime).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderItem;
    use crate::repository::MockOrderRepositoryTrait;
    use crate::repository::memory::InMemoryOrderRepository;

    fn item() -> OrderItem {
        OrderItem {
            spu_id: 1,
            sku_id: 11,
            sku_name: "默认".to_string(),
            quantity: 1,
            original_price: 100,
            real_price: 100,
        }
    }

    fn seeded(status: OrderStatus) -> (Arc<InMemoryOrderRepository>, OrderService) {
        let repo = Arc::new(InMemoryOrderRepository::default());
        let mut order = Order::new(3, vec![item()]);
        order.sn = "order-1".to_string();
        order.status = status;
        repo.insert(order);
        (repo.clone(), OrderService::new(repo))
    }

    #[tokio::test]
    async fn test_create_order_generates_sn() {
        let (_, svc) = seeded(OrderStatus::Init);
        let order = svc.create_order(Order::new(3, vec![item()])).await.unwrap();
        assert!(order.sn.starts_with("ORD"));
        assert_eq!(order.status, OrderStatus::Init);

        let err = svc.create_order(Order::new(3, vec![])).await.unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
    }

    #[tokio::test]
    async fn test_attach_payment_moves_to_processing() {
        let (repo, svc) = seeded(OrderStatus::Init);
        svc.update_order_payment_id_and_sn(3, 1, 99, "PAY-99").await.unwrap();
        assert_eq!(repo.status_of("order-1"), Some(OrderStatus::Processing));

        let order = svc.find_order_by_uid_and_sn(3, "order-1").await.unwrap();
        assert_eq!(order.payment_sn, "PAY-99");

        // 其他买家不可见
        let err = svc.update_order_payment_id_and_sn(4, 1, 99, "PAY-99").await.unwrap_err();
        assert!(matches!(err, OrderError::OrderNotFound(_)));
    }

    #[tokio::test]
    async fn test_attach_payment_keeps_completed_order() {
        let (repo, svc) = seeded(OrderStatus::Success);
        svc.update_order_payment_id_and_sn(3, 1, 99, "PAY-99").await.unwrap();
        assert_eq!(repo.status_of("order-1"), Some(OrderStatus::Success));
    }

    #[tokio::test]
    async fn test_succeed_and_fail_are_idempotent() {
        let (repo, svc) = seeded(OrderStatus::Processing);
        svc.succeed_order(3, "order-1").await.unwrap();
        svc.succeed_order(3, "order-1").await.unwrap();
        assert_eq!(repo.status_of("order-1"), Some(OrderStatus::Success));

        let (repo, svc) = seeded(OrderStatus::Processing);
        svc.fail_order(3, "order-1").await.unwrap();
        svc.fail_order(3, "order-1").await.unwrap();
        assert_eq!(repo.status_of("order-1"), Some(OrderStatus::Failed));
    }

    #[tokio::test]
    async fn test_terminal_order_rejects_other_target() {
        let (repo, svc) = seeded(OrderStatus::Success);
        let err = svc.fail_order(3, "order-1").await.unwrap_err();
        assert!(matches!(
            err,
            OrderError::InvalidOrderStatus {
                current: OrderStatus::Success,
                target: OrderStatus::Failed,
                ..
            }
        ));
        assert_eq!(repo.status_of("order-1"), Some(OrderStatus::Success));
    }

    #[tokio::test]
    async fn test_complete_order_overrides_and_repeats() {
        let (repo, svc) = seeded(OrderStatus::Failed);
        svc.complete_order(3, "order-1").await.unwrap();
        svc.complete_order(3, "order-1").await.unwrap();
        assert_eq!(repo.status_of("order-1"), Some(OrderStatus::Success));

        let err = svc.complete_order(3, "missing").await.unwrap_err();
        assert!(matches!(err, OrderError::OrderNotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_only_from_pending() {
        let (repo, svc) = seeded(OrderStatus::Init);
        svc.cancel_order(3, "order-1").await.unwrap();
        assert_eq!(repo.status_of("order-1"), Some(OrderStatus::Canceled));

        let (_, svc) = seeded(OrderStatus::TimeoutClosed);
        assert!(svc.cancel_order(3, "order-1").await.is_err());
    }

    #[tokio::test]
    async fn test_find_timeout_orders_queries_processing() {
        let mut repo = MockOrderRepositoryTrait::new();
        repo.expect_find_orders_by_status()
            .withf(|status, offset, limit, _| {
                *status == OrderStatus::Processing && *offset == 0 && *limit == 10
            })
            .times(1)
            .returning(|_, _, _, _| Ok((vec![], 0)));
        repo.expect_find_orders_by_status()
            .withf(|status, _, _, _| *status == OrderStatus::Init)
            .times(1)
            .returning(|_, _, _, _| Ok((vec![], 0)));

        let svc = OrderService::new(Arc::new(repo));
        let now = Utc::now();
        assert_eq!(svc.find_timeout_orders(0, 10, now).await.unwrap().1, 0);
        assert_eq!(svc.find_expired_orders(0, 10, now).await.unwrap().1, 0);
    }

    #[tokio::test]
    async fn test_transition_propagates_database_error() {
        let mut repo = MockOrderRepositoryTrait::new();
        repo.expect_transition_order_status()
            .returning(|_, _, _, _| Err(OrderError::Database(sqlx::Error::PoolTimedOut)));

        let svc = OrderService::new(Arc::new(repo));
        let err = svc.succeed_order(3, "order-1").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
