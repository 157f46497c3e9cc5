//! 超时未支付订单关闭任务

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mall_shared::config::TimeoutConfig;
use mall_shared::job::Job;
use mall_shared::observability::metrics;
use tracing::info;

use crate::service::OrderService;

pub struct CloseExpiredOrdersJob {
    service: Arc<OrderService>,
    timeouts: TimeoutConfig,
    batch_size: i64,
}

impl CloseExpiredOrdersJob {
    pub fn new(service: Arc<OrderService>, timeouts: TimeoutConfig, batch_size: i64) -> Self {
        Self {
            service,
            timeouts,
            batch_size,
        }
    }
}

#[async_trait]
impl Job for CloseExpiredOrdersJob {
    fn name(&self) -> &str {
        "close_expired_orders"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let cutoff = self.timeouts.order_close_cutoff(Utc::now());
        let mut offset = 0;
        let mut closed_total = 0u64;

        loop {
            let (orders, total) = self
                .service
                .find_expired_orders(offset, self.batch_size, cutoff)
                .await?;
            if orders.is_empty() {
                break;
            }

            let ids: Vec<i64> = orders.iter().map(|o| o.id).collect();
            let closed = self.service.close_expired_orders(&ids, cutoff).await?;
            closed_total += closed;
            metrics::record_orders_closed(closed);

            // 已关闭的订单离开了查询结果集，偏移只跳过本页未能关闭的部分
            let skipped = orders.len() as i64 - closed as i64;
            if (orders.len() as i64) < self.batch_size {
                break;
            }
            offset += skipped;
            if offset >= total - closed as i64 {
                break;
            }
        }

        info!(closed = closed_total, %cutoff, "超时订单关闭完成");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Order, OrderItem, OrderStatus};
    use crate::repository::memory::InMemoryOrderRepository;

    fn order(sn: &str, age: chrono::Duration, status: OrderStatus) -> Order {
        let mut order = Order::new(
            5,
            vec![OrderItem {
                spu_id: 1,
                sku_id: 1,
                sku_name: "默认".to_string(),
                quantity: 1,
                original_price: 200,
                real_price: 200,
            }],
        );
        order.sn = sn.to_string();
        order.status = status;
        order.ctime = Utc::now() - age;
        order
    }

    #[tokio::test]
    async fn test_closes_expired_unpaid_order() {
        let repo = Arc::new(InMemoryOrderRepository::default());
        repo.insert(order("OrderSN-close-200", chrono::Duration::hours(2), OrderStatus::Init));
        // 尚在有效期内
        repo.insert(order("OrderSN-fresh", chrono::Duration::minutes(5), OrderStatus::Init));
        // 已关联支付，交给对账处理
        repo.insert(order("OrderSN-paying", chrono::Duration::hours(2), OrderStatus::Processing));

        let job = CloseExpiredOrdersJob::new(
            Arc::new(OrderService::new(repo.clone())),
            TimeoutConfig::default(),
            100,
        );
        tokio_test::assert_ok!(job.run().await);

        assert_eq!(repo.status_of("OrderSN-close-200"), Some(OrderStatus::TimeoutClosed));
        assert_eq!(repo.status_of("OrderSN-fresh"), Some(OrderStatus::Init));
        assert_eq!(repo.status_of("OrderSN-paying"), Some(OrderStatus::Processing));
    }

    #[tokio::test]
    async fn test_pages_through_all_expired_orders() {
        let repo = Arc::new(InMemoryOrderRepository::default());
        for i in 0..7 {
            repo.insert(order(&format!("expired-{i}"), chrono::Duration::hours(1), OrderStatus::Init));
        }

        let job = CloseExpiredOrdersJob::new(
            Arc::new(OrderService::new(repo.clone())),
            TimeoutConfig::default(),
            3,
        );
        tokio_test::assert_ok!(job.run().await);

        for i in 0..7 {
            assert_eq!(
                repo.status_of(&format!("expired-{i}")),
                Some(OrderStatus::TimeoutClosed)
            );
        }
    }
}
