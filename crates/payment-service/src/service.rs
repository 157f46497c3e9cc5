//! 支付服务门面
//!
//! 对外暴露支付相关的全部操作：按渠道分发预支付、回调处理、
//! 微信支付单同步，以及供对账使用的查询与强制失败。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use crate::channel::{ChannelRegistry, ChannelService, CreditPaymentService};
use crate::clients::WechatTransaction;
use crate::error::{PaymentError, Result};
use crate::models::{ChannelType, Payment, PaymentStatus};
use crate::repository::PaymentRepositoryTrait;
use crate::saga::{CreditReservation, CreditSaga};

pub struct PaymentService {
    repo: Arc<dyn PaymentRepositoryTrait>,
    credit: Arc<CreditPaymentService>,
    channels: ChannelRegistry,
    saga: Arc<CreditSaga>,
}

impl PaymentService {
    /// `channels` 中应包含积分渠道之外的全部渠道，积分渠道会被自动注册
    pub fn new(
        repo: Arc<dyn PaymentRepositoryTrait>,
        credit: Arc<CreditPaymentService>,
        mut channels: ChannelRegistry,
        saga: Arc<CreditSaga>,
    ) -> Self {
        channels.register(credit.clone());
        Self {
            repo,
            credit,
            channels,
            saga,
        }
    }

    /// 创建支付
    ///
    /// - 纯积分：同步完成支付
    /// - 含微信：先预扣积分（如有），再向微信预支付，结果由回调或同步任务决定
    ///
    /// 混合支付中微信预支付失败时，支付单置为失败并释放已预扣的积分。
    #[instrument(skip(self, payment), fields(order_sn = %payment.order_sn))]
    pub async fn create_payment(&self, payment: Payment) -> Result<Payment> {
        if payment.records.is_empty() {
            return Err(PaymentError::Validation("支付记录不能为空".to_string()));
        }

        let Some(channel) = payment.wechat_record().map(|r| r.channel) else {
            return self.credit.pay(payment).await;
        };
        let wechat = self.channels.get(channel)?;

        if payment.credit_record().is_none() {
            return wechat.prepay(payment).await;
        }

        let reserved = self.credit.prepay(payment).await?;
        match wechat.prepay(reserved.clone()).await {
            Ok(payment) => Ok(payment),
            Err(cause) => {
                warn!(payment_sn = %reserved.sn, error = %cause, "微信预支付失败，释放积分预扣");
                Err(self.abort_reserved(reserved, cause).await)
            }
        }
    }

    async fn abort_reserved(&self, mut payment: Payment, cause: PaymentError) -> PaymentError {
        if let Err(e) = self.set_payment_status_paid_failed(&mut payment).await {
            error!(payment_sn = %payment.sn, error = %e, "混合支付单置为失败时出错");
        }
        match self.handle_credit_callback(&payment).await {
            Ok(()) => PaymentError::Compensated {
                cause: Box::new(cause),
            },
            Err(compensation) => PaymentError::CompensationFailed {
                cause: Box::new(cause),
                compensation: Box::new(compensation),
            },
        }
    }

    pub async fn find_payment_by_id(&self, id: i64) -> Result<Payment> {
        self.repo
            .find_payment_by_id(id)
            .await?
            .ok_or_else(|| PaymentError::PaymentNotFound(id.to_string()))
    }

    pub async fn find_payment_by_order_sn(&self, order_sn: &str) -> Result<Payment> {
        self.repo
            .find_payment_by_order_sn(order_sn)
            .await?
            .ok_or_else(|| PaymentError::PaymentNotFound(order_sn.to_string()))
    }

    /// 将未决的支付单强制置为失败
    ///
    /// 条件更新：支付单已被其他流程终结时保持原状，并把最新状态回填到 `payment`，
    /// 调用方据此走对应的收敛路径。
    #[instrument(skip(self, payment), fields(payment_id = payment.id))]
    pub async fn set_payment_status_paid_failed(&self, payment: &mut Payment) -> Result<()> {
        if self.repo.mark_failed_if_pending(payment.id).await? {
            for record in &mut payment.records {
                if record.status.is_pending() {
                    record.status = PaymentStatus::PaidFailed;
                }
            }
            payment.status = PaymentStatus::PaidFailed;
            payment.utime = Utc::now();
            info!("支付单已强制置为失败");
            return Ok(());
        }

        *payment = self.find_payment_by_id(payment.id).await?;
        info!(status = %payment.status, "支付单已被其他流程终结，保留现有状态");
        Ok(())
    }

    /// 按支付单状态结算积分
    ///
    /// 成功则确认扣减，失败类状态则取消预扣；没有积分记录时为空操作。
    /// 积分侧以事务 ID 幂等，可安全重复调用。
    pub async fn handle_credit_callback(&self, payment: &Payment) -> Result<()> {
        let Some(record) = payment.credit_record() else {
            return Ok(());
        };
        let mut reservation = CreditReservation::reserved(payment.payer_id, record.payment_no_3rd.clone(), record.amount);

        match payment.status {
            PaymentStatus::PaidSuccess => self.saga.confirm(&mut reservation).await,
            status if status.is_failure() => self.saga.cancel(&mut reservation).await,
            status => Err(PaymentError::Validation(format!(
                "支付单 {} 状态为 {status}，无法结算积分",
                payment.sn
            ))),
        }
    }

    /// 处理微信支付回调
    pub async fn handle_wechat_callback(&self, txn: &WechatTransaction) -> Result<()> {
        let payment = self
            .repo
            .find_payment_by_sn(&txn.out_trade_no)
            .await?
            .ok_or_else(|| PaymentError::PaymentNotFound(txn.out_trade_no.clone()))?;

        let channel = payment
            .wechat_record()
            .map(|r| r.channel)
            .ok_or(PaymentError::UnsupportedChannel(ChannelType::Credit))?;
        self.channels.get(channel)?.handle_callback(txn).await
    }

    /// 主动同步订单对应的微信支付结果
    pub async fn sync_wechat_info(&self, order_sn: &str) -> Result<Payment> {
        let payment = self.find_payment_by_order_sn(order_sn).await?;
        self.sync_payment(&payment).await
    }

    pub(crate) async fn sync_payment(&self, payment: &Payment) -> Result<Payment> {
        let channel = payment
            .wechat_record()
            .map(|r| r.channel)
            .ok_or(PaymentError::UnsupportedChannel(ChannelType::Credit))?;
        self.channels.get(channel)?.query_order_by_sn(&payment.sn).await
    }

    /// 分页查询超时未决的微信支付单
    pub async fn find_timeout_payments(
        &self,
        offset: i64,
        limit: i64,
        ctime: DateTime<Utc>,
    ) -> Result<(Vec<Payment>, i64)> {
        self.repo.find_timeout_payments(offset, limit, ctime).await
    }
}
