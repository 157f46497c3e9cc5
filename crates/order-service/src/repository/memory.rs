//! 内存版订单仓储，用于服务层和任务的场景测试

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::traits::OrderRepositoryTrait;
use crate::error::Result;
use crate::models::{Order, OrderStatus};

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: Mutex<Vec<Order>>,
}

impl InMemoryOrderRepository {
    pub fn insert(&self, mut order: Order) -> Order {
        let mut orders = self.orders.lock().unwrap();
        order.id = orders.len() as i64 + 1;
        orders.push(order.clone());
        order
    }

    pub fn status_of(&self, sn: &str) -> Option<OrderStatus> {
        self.orders
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.sn == sn)
            .map(|o| o.status)
    }
}

#[async_trait]
impl OrderRepositoryTrait for InMemoryOrderRepository {
    async fn create_order(&self, order: &Order) -> Result<Order> {
        Ok(self.insert(order.clone()))
    }

    async fn update_order_payment_id_and_sn(
        &self,
        buyer_id: i64,
        order_id: i64,
        payment_id: i64,
        payment_sn: &str,
    ) -> Result<bool> {
        let mut orders = self.orders.lock().unwrap();
        let Some(order) = orders
            .iter_mut()
            .find(|o| o.buyer_id == buyer_id && o.id == order_id)
        else {
            return Ok(false);
        };
        order.payment_id = payment_id;
        order.payment_sn = payment_sn.to_string();
        if order.status == OrderStatus::Init {
            order.status = OrderStatus::Processing;
        }
        Ok(true)
    }

    async fn find_order_by_uid_and_sn(&self, buyer_id: i64, sn: &str) -> Result<Option<Order>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.buyer_id == buyer_id && o.sn == sn)
            .cloned())
    }

    async fn set_order_status(&self, buyer_id: i64, sn: &str, status: OrderStatus) -> Result<bool> {
        let mut orders = self.orders.lock().unwrap();
        match orders.iter_mut().find(|o| o.buyer_id == buyer_id && o.sn == sn) {
            Some(order) => {
                order.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn transition_order_status(
        &self,
        buyer_id: i64,
        sn: &str,
        from: &[OrderStatus],
        to: OrderStatus,
    ) -> Result<bool> {
        let mut orders = self.orders.lock().unwrap();
        match orders
            .iter_mut()
            .find(|o| o.buyer_id == buyer_id && o.sn == sn && from.contains(&o.status))
        {
            Some(order) => {
                order.status = to;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_orders_by_status(
        &self,
        status: OrderStatus,
        offset: i64,
        limit: i64,
        ctime: DateTime<Utc>,
    ) -> Result<(Vec<Order>, i64)> {
        let orders = self.orders.lock().unwrap();
        let matched: Vec<Order> = orders
            .iter()
            .filter(|o| o.status == status && o.ctime <= ctime)
            .cloned()
            .collect();
        let total = matched.len() as i64;
        let page = matched
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn close_expired_orders(&self, ids: &[i64], ctime: DateTime<Utc>) -> Result<u64> {
        let mut orders = self.orders.lock().unwrap();
        let mut closed = 0;
        for order in orders.iter_mut() {
            if ids.contains(&order.id) && order.status == OrderStatus::Init && order.ctime <= ctime {
                order.status = OrderStatus::TimeoutClosed;
                closed += 1;
            }
        }
        Ok(closed)
    }
}
