//! 积分支付渠道
//!
//! 积分支付是同步完成的：预扣 -> 落库 -> 确认扣减 -> 更新记录 -> 发送事件。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, instrument};

use super::ChannelService;
use crate::error::{PaymentError, Result};
use crate::events::PaymentEventProducer;
use crate::models::{ChannelType, Payment, PaymentStatus};
use crate::repository::PaymentRepositoryTrait;
use crate::saga::{CreditReservation, CreditSaga};

pub struct CreditPaymentService {
    repo: Arc<dyn PaymentRepositoryTrait>,
    saga: Arc<CreditSaga>,
    events: PaymentEventProducer,
}

impl CreditPaymentService {
    pub fn new(
        repo: Arc<dyn PaymentRepositoryTrait>,
        saga: Arc<CreditSaga>,
        events: PaymentEventProducer,
    ) -> Self {
        Self { repo, saga, events }
    }

    /// 完成一笔纯积分支付
    ///
    /// 成功发送 PaidSuccess 事件，任一步失败发送 PaidFailed 事件。
    #[instrument(skip(self, payment), fields(order_sn = %payment.order_sn))]
    pub async fn pay(&self, payment: Payment) -> Result<Payment> {
        let mut payment = match self.prepay(payment.clone()).await {
            Ok(payment) => payment,
            Err(e) => {
                error!(error = %e, "积分预扣失败");
                self.events.notify(&payment, PaymentStatus::PaidFailed).await;
                return Err(e);
            }
        };

        let pending = payment.clone();
        payment.set_status(PaymentStatus::PaidSuccess, Utc::now());
        if let Err(e) = self.handle_callback(&payment).await {
            error!(payment_sn = %payment.sn, error = %e, "积分支付失败");
            // 支付单已落库，失败结果也要落库，否则对账会把它当作未决单重新确认
            if let Err(mark_err) = self.repo.mark_failed_if_pending(pending.id).await {
                error!(payment_sn = %pending.sn, error = %mark_err, "积分支付单置为失败时出错");
            }
            self.events.notify(&pending, PaymentStatus::PaidFailed).await;
            return Err(e);
        }

        info!(payment_sn = %payment.sn, "积分支付成功");
        self.events.notify(&payment, PaymentStatus::PaidSuccess).await;
        Ok(payment)
    }

    /// 确认积分扣减并把支付结果写回
    ///
    /// 积分一旦确认就不可撤销，此后记录更新失败只能告警，由人工对账修复。
    pub async fn handle_callback(&self, payment: &Payment) -> Result<()> {
        let record = payment
            .credit_record()
            .ok_or_else(|| PaymentError::Validation("缺少积分支付记录".to_string()))?;

        let mut reservation = CreditReservation::reserved(payment.payer_id, record.payment_no_3rd.clone(), record.amount);
        self.saga.confirm_or_compensate(&mut reservation).await?;

        if let Err(e) = self.repo.update_payment(payment).await {
            error!(
                payment_sn = %payment.sn,
                tid = %reservation.tid,
                error = %e,
                "积分已确认扣减，但支付记录更新失败，需要人工对账"
            );
            mall_shared::observability::metrics::record_payment_inconsistency(
                "credit_confirmed_record_stale",
            );
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelService for CreditPaymentService {
    fn channel(&self) -> ChannelType {
        ChannelType::Credit
    }

    /// 预扣积分并创建支付单
    ///
    /// 支付单落库失败时取消预扣，避免积分被冻结。
    async fn prepay(&self, mut payment: Payment) -> Result<Payment> {
        let amount = payment
            .credit_record()
            .map(|r| r.amount)
            .ok_or_else(|| PaymentError::Validation("缺少积分支付记录或积分金额为 0".to_string()))?;

        payment.ensure_sn();
        let mut reservation = self.saga.reserve(&payment, amount).await?;

        if let Some(record) = payment.record_mut(ChannelType::Credit) {
            record.payment_no_3rd = reservation.tid.clone();
        }

        match self.repo.create_payment(&payment).await {
            Ok(created) => Ok(created),
            Err(e) => {
                error!(payment_sn = %payment.sn, error = %e, "支付单落库失败，取消积分预扣");
                Err(self.saga.compensate(&mut reservation, e).await)
            }
        }
    }

    async fn query_order_by_sn(&self, payment_sn: &str) -> Result<Payment> {
        self.repo
            .find_payment_by_sn(payment_sn)
            .await?
            .ok_or_else(|| PaymentError::PaymentNotFound(payment_sn.to_string()))
    }
}
