//! 内存版支付单仓储，用于同步任务与并发写入的场景测试

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::traits::PaymentRepositoryTrait;
use crate::error::Result;
use crate::models::{Payment, PaymentStatus};

#[derive(Default)]
pub struct InMemoryPaymentRepository {
    payments: Mutex<Vec<Payment>>,
}

impl InMemoryPaymentRepository {
    pub fn insert(&self, mut payment: Payment) -> Payment {
        let mut payments = self.payments.lock().unwrap();
        payment.id = payments.len() as i64 + 1;
        for record in &mut payment.records {
            record.payment_id = payment.id;
        }
        payments.push(payment.clone());
        payment
    }

    pub fn status_of(&self, sn: &str) -> Option<PaymentStatus> {
        self.payments
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.sn == sn)
            .map(|p| p.status)
    }

    fn find(&self, pred: impl Fn(&Payment) -> bool) -> Option<Payment> {
        self.payments.lock().unwrap().iter().find(|p| pred(p)).cloned()
    }
}

#[async_trait]
impl PaymentRepositoryTrait for InMemoryPaymentRepository {
    async fn create_payment(&self, payment: &Payment) -> Result<Payment> {
        Ok(self.insert(payment.clone()))
    }

    async fn update_payment(&self, payment: &Payment) -> Result<()> {
        let mut payments = self.payments.lock().unwrap();
        if let Some(stored) = payments.iter_mut().find(|p| p.id == payment.id) {
            *stored = payment.clone();
        }
        Ok(())
    }

    async fn mark_failed_if_pending(&self, id: i64) -> Result<bool> {
        let mut payments = self.payments.lock().unwrap();
        match payments.iter_mut().find(|p| p.id == id && p.status.is_pending()) {
            Some(payment) => {
                payment.set_status(PaymentStatus::PaidFailed, Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn resolve_if_pending(&self, payment: &Payment) -> Result<bool> {
        let mut payments = self.payments.lock().unwrap();
        match payments
            .iter_mut()
            .find(|p| p.id == payment.id && p.status.is_pending())
        {
            Some(stored) => {
                *stored = payment.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_payment_by_id(&self, id: i64) -> Result<Option<Payment>> {
        Ok(self.find(|p| p.id == id))
    }

    async fn find_payment_by_sn(&self, sn: &str) -> Result<Option<Payment>> {
        Ok(self.find(|p| p.sn == sn))
    }

    async fn find_payment_by_order_sn(&self, order_sn: &str) -> Result<Option<Payment>> {
        Ok(self.find(|p| p.order_sn == order_sn))
    }

    async fn find_timeout_payments(
        &self,
        offset: i64,
        limit: i64,
        ctime: DateTime<Utc>,
    ) -> Result<(Vec<Payment>, i64)> {
        let payments = self.payments.lock().unwrap();
        let matched: Vec<Payment> = payments
            .iter()
            .filter(|p| p.status.is_pending() && p.ctime <= ctime && p.wechat_record().is_some())
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
}
