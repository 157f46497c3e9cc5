//! 支付单仓储
//!
//! 支付单与渠道记录分表存储，写操作在同一事务内完成

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};

use super::traits::PaymentRepositoryTrait;
use crate::error::Result;
use crate::models::{Payment, PaymentRecord, PaymentStatus};

const PAYMENT_COLUMNS: &str = "id, sn, payer_id, order_id, order_sn, total_amount, status, \
                               paid_at, pay_ddl, ctime, utime";

/// 支付单仓储
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==================== 内部辅助 ====================

    async fn find_one(&self, column: &str, value: &str) -> Result<Option<Payment>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE {column} = $1");
        let payment = sqlx::query_as::<_, Payment>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        match payment {
            Some(mut payment) => {
                self.attach_records(std::slice::from_mut(&mut payment)).await?;
                Ok(Some(payment))
            }
            None => Ok(None),
        }
    }

    /// 批量加载渠道记录并挂到对应支付单上
    async fn attach_records(&self, payments: &mut [Payment]) -> Result<()> {
        if payments.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = payments.iter().map(|p| p.id).collect();

        let records = sqlx::query_as::<_, PaymentRecord>(
            r#"
            SELECT payment_id, channel, amount, payment_no_3rd, status, description,
                   wechat_code_url, wechat_js_api_resp, paid_at
            FROM payment_records
            WHERE payment_id = ANY($1)
            ORDER BY payment_id, channel
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        for record in records {
            if let Some(payment) = payments.iter_mut().find(|p| p.id == record.payment_id) {
                payment.records.push(record);
            }
        }
        Ok(())
    }

    async fn upsert_record(conn: &mut PgConnection, record: &PaymentRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_records (payment_id, channel, amount, payment_no_3rd, status,
                                         description, wechat_code_url, wechat_js_api_resp,
                                         paid_at, ctime, utime)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
            ON CONFLICT (payment_id, channel) DO UPDATE
            SET payment_no_3rd = EXCLUDED.payment_no_3rd,
                status = EXCLUDED.status,
                wechat_code_url = EXCLUDED.wechat_code_url,
                wechat_js_api_resp = EXCLUDED.wechat_js_api_resp,
                paid_at = EXCLUDED.paid_at,
                utime = NOW()
            "#,
        )
        .bind(record.payment_id)
        .bind(record.channel)
        .bind(record.amount)
        .bind(&record.payment_no_3rd)
        .bind(record.status)
        .bind(&record.description)
        .bind(&record.wechat_code_url)
        .bind(&record.wechat_js_api_resp)
        .bind(record.paid_at)
        .execute(conn)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl PaymentRepositoryTrait for PaymentRepository {
    async fn create_payment(&self, payment: &Payment) -> Result<Payment> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO payments (sn, payer_id, order_id, order_sn, total_amount, status,
                                  paid_at, pay_ddl, ctime, utime)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(&payment.sn)
        .bind(payment.payer_id)
        .bind(payment.order_id)
        .bind(&payment.order_sn)
        .bind(payment.total_amount)
        .bind(payment.status)
        .bind(payment.paid_at)
        .bind(payment.pay_ddl)
        .bind(payment.ctime)
        .bind(payment.utime)
        .fetch_one(&mut *tx)
        .await?;

        let mut created = payment.clone();
        created.id = row.get("id");
        for record in &mut created.records {
            record.payment_id = created.id;
            Self::upsert_record(&mut *tx, record).await?;
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn update_payment(&self, payment: &Payment) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, paid_at = $3, pay_ddl = $4, utime = NOW()
            WHERE id = $1
            "#,
        )
        .bind(payment.id)
        .bind(payment.status)
        .bind(payment.paid_at)
        .bind(payment.pay_ddl)
        .execute(&mut *tx)
        .await?;

        for record in &payment.records {
            let mut record = record.clone();
            record.payment_id = payment.id;
            Self::upsert_record(&mut *tx, &record).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn mark_failed_if_pending(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, utime = NOW()
            WHERE id = $1 AND status IN ($3, $4)
            "#,
        )
        .bind(id)
        .bind(PaymentStatus::PaidFailed)
        .bind(PaymentStatus::Unpaid)
        .bind(PaymentStatus::Processing)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE payment_records
            SET status = $2, utime = NOW()
            WHERE payment_id = $1 AND status IN ($3, $4)
            "#,
        )
        .bind(id)
        .bind(PaymentStatus::PaidFailed)
        .bind(PaymentStatus::Unpaid)
        .bind(PaymentStatus::Processing)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn resolve_if_pending(&self, payment: &Payment) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, paid_at = $3, utime = NOW()
            WHERE id = $1 AND status IN ($4, $5)
            "#,
        )
        .bind(payment.id)
        .bind(payment.status)
        .bind(payment.paid_at)
        .bind(PaymentStatus::Unpaid)
        .bind(PaymentStatus::Processing)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for record in &payment.records {
            let mut record = record.clone();
            record.payment_id = payment.id;
            Self::upsert_record(&mut *tx, &record).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn find_payment_by_id(&self, id: i64) -> Result<Option<Payment>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
        let payment = sqlx::query_as::<_, Payment>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match payment {
            Some(mut payment) => {
                self.attach_records(std::slice::from_mut(&mut payment)).await?;
                Ok(Some(payment))
            }
            None => Ok(None),
        }
    }

    async fn find_payment_by_sn(&self, sn: &str) -> Result<Option<Payment>> {
        self.find_one("sn", sn).await
    }

    async fn find_payment_by_order_sn(&self, order_sn: &str) -> Result<Option<Payment>> {
        self.find_one("order_sn", order_sn).await
    }

    async fn find_timeout_payments(
        &self,
        offset: i64,
        limit: i64,
        ctime: DateTime<Utc>,
    ) -> Result<(Vec<Payment>, i64)> {
        // 只关心仍未决且走过微信渠道的支付单
        let filter = r#"
            FROM payments p
            WHERE p.status IN ($1, $2) AND p.ctime <= $3
              AND EXISTS (
                  SELECT 1 FROM payment_records r
                  WHERE r.payment_id = p.id AND r.channel IN (2, 3)
              )
        "#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {filter}"))
            .bind(PaymentStatus::Unpaid)
            .bind(PaymentStatus::Processing)
            .bind(ctime)
            .fetch_one(&self.pool)
            .await?;

        let sql = format!(
            "SELECT p.id, p.sn, p.payer_id, p.order_id, p.order_sn, p.total_amount, p.status, \
             p.paid_at, p.pay_ddl, p.ctime, p.utime {filter} ORDER BY p.id LIMIT $4 OFFSET $5"
        );
        let mut payments = sqlx::query_as::<_, Payment>(&sql)
            .bind(PaymentStatus::Unpaid)
            .bind(PaymentStatus::Processing)
            .bind(ctime)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        self.attach_records(&mut payments).await?;
        Ok((payments, total))
    }
}
