//! 订单仓储
//!
//! 状态迁移全部使用带条件的 UPDATE，并发写入时由数据库保证只有一方生效

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use super::traits::OrderRepositoryTrait;
use crate::error::Result;
use crate::models::{Order, OrderItem, OrderStatus};

/// 订单仓储
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn attach_items(&self, orders: &mut [Order]) -> Result<()> {
        if orders.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = orders.iter().map(|o| o.id).collect();

        let rows = sqlx::query(
            r#"
            SELECT order_id, spu_id, sku_id, sku_name, quantity, original_price, real_price
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let order_id: i64 = row.get("order_id");
            let item = OrderItem {
                spu_id: row.get("spu_id"),
                sku_id: row.get("sku_id"),
                sku_name: row.get("sku_name"),
                quantity: row.get("quantity"),
                original_price: row.get("original_price"),
                real_price: row.get("real_price"),
            };
            if let Some(order) = orders.iter_mut().find(|o| o.id == order_id) {
                order.items.push(item);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl OrderRepositoryTrait for OrderRepository {
    async fn create_order(&self, order: &Order) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO orders (sn, buyer_id, payment_id, payment_sn, original_total_amt,
                                real_total_amt, status, ctime, utime)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(&order.sn)
        .bind(order.buyer_id)
        .bind(order.payment_id)
        .bind(&order.payment_sn)
        .bind(order.original_total_amt)
        .bind(order.real_total_amt)
        .bind(order.status)
        .bind(order.ctime)
        .bind(order.utime)
        .fetch_one(&mut *tx)
        .await?;
        let order_id: i64 = row.get("id");

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, spu_id, sku_id, sku_name, quantity,
                                         original_price, real_price, ctime, utime)
                VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
                "#,
            )
            .bind(order_id)
            .bind(item.spu_id)
            .bind(item.sku_id)
            .bind(&item.sku_name)
            .bind(item.quantity)
            .bind(item.original_price)
            .bind(item.real_price)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let mut created = order.clone();
        created.id = order_id;
        Ok(created)
    }

    async fn update_order_payment_id_and_sn(
        &self,
        buyer_id: i64,
        order_id: i64,
        payment_id: i64,
        payment_sn: &str,
    ) -> Result<bool> {
        // 支付事件可能先于这里到达并已把订单置为终态，此时只补写支付信息
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET payment_id = $3, payment_sn = $4,
                status = CASE WHEN status = $5 THEN $6 ELSE status END,
                utime = NOW()
            WHERE buyer_id = $1 AND id = $2
            "#,
        )
        .bind(buyer_id)
        .bind(order_id)
        .bind(payment_id)
        .bind(payment_sn)
        .bind(OrderStatus::Init)
        .bind(OrderStatus::Processing)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_order_by_uid_and_sn(&self, buyer_id: i64, sn: &str) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, sn, buyer_id, payment_id, payment_sn, original_total_amt,
                   real_total_amt, status, ctime, utime
            FROM orders
            WHERE buyer_id = $1 AND sn = $2
            "#,
        )
        .bind(buyer_id)
        .bind(sn)
        .fetch_optional(&self.pool)
        .await?;

        match order {
            Some(mut order) => {
                self.attach_items(std::slice::from_mut(&mut order)).await?;
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }

    async fn set_order_status(&self, buyer_id: i64, sn: &str, status: OrderStatus) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, utime = NOW()
            WHERE buyer_id = $1 AND sn = $2
            "#,
        )
        .bind(buyer_id)
        .bind(sn)
        .bind(status)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn transition_order_status(
        &self,
        buyer_id: i64,
        sn: &str,
        from: &[OrderStatus],
        to: OrderStatus,
    ) -> Result<bool> {
        let from: Vec<i16> = from.iter().map(|s| *s as i16).collect();
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, utime = NOW()
            WHERE buyer_id = $1 AND sn = $2 AND status = ANY($4)
            "#,
        )
        .bind(buyer_id)
        .bind(sn)
        .bind(to)
        .bind(&from)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_orders_by_status(
        &self,
        status: OrderStatus,
        offset: i64,
        limit: i64,
        ctime: DateTime<Utc>,
    ) -> Result<(Vec<Order>, i64)> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders WHERE status = $1 AND ctime <= $2",
        )
        .bind(status)
        .bind(ctime)
        .fetch_one(&self.pool)
        .await?;

        let mut orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, sn, buyer_id, payment_id, payment_sn, original_total_amt,
                   real_total_amt, status, ctime, utime
            FROM orders
            WHERE status = $1 AND ctime <= $2
            ORDER BY id
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(status)
        .bind(ctime)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        self.attach_items(&mut orders).await?;
        Ok((orders, total))
    }

    async fn close_expired_orders(&self, ids: &[i64], ctime: DateTime<Utc>) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $1, utime = NOW()
            WHERE id = ANY($2) AND status = $3 AND ctime <= $4
            "#,
        )
        .bind(OrderStatus::TimeoutClosed)
        .bind(ids)
        .bind(OrderStatus::Init)
        .bind(ctime)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
