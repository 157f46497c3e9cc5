//! 微信支付渠道（Native 扫码 / JSAPI 小程序）
//!
//! 两种下单方式只在预支付凭证上不同，回调处理与主动查询共用 `WechatCore`。
//! 混合支付时，微信结果同时决定积分预扣是确认还是取消。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mall_shared::error::MallError;
use mall_shared::observability::metrics;
use mall_shared::retry::{RetryPolicy, retry_with_policy, with_timeout};
use tracing::{error, info, instrument, warn};

use super::{ChannelService, trade_state_to_status};
use crate::clients::{PrepayRequest, UserService, WechatPayClient, WechatTransaction};
use crate::error::{PaymentError, Result};
use crate::events::PaymentEventProducer;
use crate::models::{ChannelType, Payment, PaymentStatus};
use crate::repository::PaymentRepositoryTrait;
use crate::saga::{CreditReservation, CreditSaga};

const DEFAULT_DESCRIPTION: &str = "商品订单";

/// 微信渠道公共逻辑
pub struct WechatCore {
    repo: Arc<dyn PaymentRepositoryTrait>,
    client: Arc<dyn WechatPayClient>,
    saga: Arc<CreditSaga>,
    events: PaymentEventProducer,
    policy: RetryPolicy,
    call_timeout: Duration,
    /// 预支付有效期
    expiry: chrono::Duration,
}

impl WechatCore {
    pub fn new(
        repo: Arc<dyn PaymentRepositoryTrait>,
        client: Arc<dyn WechatPayClient>,
        saga: Arc<CreditSaga>,
        events: PaymentEventProducer,
        policy: RetryPolicy,
        call_timeout: Duration,
        expiry: chrono::Duration,
    ) -> Self {
        Self {
            repo,
            client,
            saga,
            events,
            policy,
            call_timeout,
            expiry,
        }
    }

    /// 校验微信记录并生成预支付请求
    fn prepare(
        &self,
        payment: &mut Payment,
        channel: ChannelType,
        payer_openid: Option<String>,
    ) -> Result<PrepayRequest> {
        let record = payment
            .record(channel)
            .filter(|r| r.amount > 0)
            .ok_or_else(|| PaymentError::Validation(format!("缺少{channel}支付记录或金额为 0")))?;

        let description = if record.description.is_empty() {
            DEFAULT_DESCRIPTION.to_string()
        } else {
            record.description.clone()
        };
        let amount_total = record.amount;

        payment.ensure_sn();
        let time_expire = Utc::now() + self.expiry;
        payment.pay_ddl = Some(time_expire);

        Ok(PrepayRequest {
            description,
            out_trade_no: payment.sn.clone(),
            time_expire,
            amount_total,
            payer_openid,
        })
    }

    /// 预支付后持久化：新支付单插入，混合支付中已由积分渠道创建的则更新
    async fn persist_prepaid(&self, mut payment: Payment, channel: ChannelType) -> Result<Payment> {
        payment.status = PaymentStatus::Processing;
        payment.utime = Utc::now();
        if let Some(record) = payment.record_mut(channel) {
            record.status = PaymentStatus::Processing;
        }

        if payment.id == 0 {
            self.repo.create_payment(&payment).await
        } else {
            self.repo.update_payment(&payment).await?;
            Ok(payment)
        }
    }

    async fn find_by_sn(&self, sn: &str) -> Result<Payment> {
        self.repo
            .find_payment_by_sn(sn)
            .await?
            .ok_or_else(|| PaymentError::PaymentNotFound(sn.to_string()))
    }

    /// 处理微信支付结果通知
    ///
    /// 只接受 SUCCESS 与失败类终态，其余状态返回 `IgnoredTradeState`。
    #[instrument(skip(self, txn), fields(out_trade_no = %txn.out_trade_no, trade_state = %txn.trade_state))]
    pub async fn handle_callback(&self, txn: &WechatTransaction) -> Result<()> {
        let status = trade_state_to_status(&txn.trade_state)?;
        if !matches!(status, PaymentStatus::PaidSuccess | PaymentStatus::PaidFailed) {
            info!("非终态的微信回调，忽略");
            return Err(PaymentError::IgnoredTradeState {
                trade_state: txn.trade_state.clone(),
            });
        }

        let payment = self.find_by_sn(&txn.out_trade_no).await?;
        if payment.status == status {
            info!("重复的微信回调，已处理过");
            return Ok(());
        }
        if !payment.status.is_pending() {
            error!(
                current = %payment.status,
                notified = %status,
                "微信回调结果与已终结的支付单冲突，需要人工处理"
            );
            metrics::record_payment_inconsistency("late_wechat_result");
            return Ok(());
        }

        self.apply_result(payment, status, txn.transaction_id.clone())
            .await
            .map(|_| ())
    }

    /// 主动查询微信侧结果
    ///
    /// 仍未决（NOTPAY / USERPAYING）的支付单被视为超时并强制关闭。
    #[instrument(skip(self))]
    pub async fn query_order_by_sn(&self, payment_sn: &str) -> Result<Payment> {
        let payment = self.find_by_sn(payment_sn).await?;
        if !payment.status.is_pending() {
            return Ok(payment);
        }

        let txn = retry_with_policy(
            &self.policy,
            "wechat_query_order",
            MallError::is_retryable,
            || {
                with_timeout(
                    "wechat",
                    self.call_timeout,
                    self.client.query_order_by_out_trade_no(payment_sn),
                )
            },
        )
        .await?;

        let mut status = trade_state_to_status(&txn.trade_state)?;
        if status.is_pending() {
            info!(trade_state = %txn.trade_state, "微信支付单超时未完成，强制关闭");
            status = PaymentStatus::TimeoutClosed;
        }

        self.apply_result(payment, status, txn.transaction_id).await
    }

    /// 结算积分、写回终态并通知订单服务
    async fn apply_result(
        &self,
        mut payment: Payment,
        status: PaymentStatus,
        transaction_id: Option<String>,
    ) -> Result<Payment> {
        self.settle_credit(&payment, status).await?;

        if let Some(transaction_id) = transaction_id
            && let Some(record) = payment.records.iter_mut().find(|r| r.channel.is_wechat())
        {
            record.payment_no_3rd = transaction_id;
        }
        payment.set_status(status, Utc::now());
        if !self.repo.resolve_if_pending(&payment).await? {
            // 回调与同步任务并发时，只有先落库的一方通知订单服务
            let current = self
                .repo
                .find_payment_by_id(payment.id)
                .await?
                .ok_or_else(|| PaymentError::PaymentNotFound(payment.sn.clone()))?;
            warn!(
                payment_sn = %payment.sn,
                current = %current.status,
                attempted = %status,
                "支付单已被其他流程终结，放弃写入"
            );
            return Ok(current);
        }

        info!(payment_sn = %payment.sn, status = %status, "微信支付结果已落库");
        self.events.notify(&payment, status).await;
        Ok(payment)
    }

    /// 混合支付的积分部分跟随微信结果确认或取消
    ///
    /// 微信已成功时积分确认失败不做取消，返回错误等待回调重投或同步任务重试。
    async fn settle_credit(&self, payment: &Payment, status: PaymentStatus) -> Result<()> {
        let Some(record) = payment.credit_record() else {
            return Ok(());
        };
        let mut reservation = CreditReservation::reserved(payment.payer_id, record.payment_no_3rd.clone(), record.amount);

        if status == PaymentStatus::PaidSuccess {
            self.saga.confirm(&mut reservation).await.inspect_err(|e| {
                warn!(payment_sn = %payment.sn, error = %e, "微信已支付但积分确认失败");
            })
        } else {
            self.saga.cancel(&mut reservation).await
        }
    }
}

/// 微信 Native 扫码支付
pub struct WechatNativePaymentService {
    core: Arc<WechatCore>,
}

impl WechatNativePaymentService {
    pub fn new(core: Arc<WechatCore>) -> Self {
        Self { core }
    }
}

#[async_trait]
impl ChannelService for WechatNativePaymentService {
    fn channel(&self) -> ChannelType {
        ChannelType::Wechat
    }

    async fn prepay(&self, mut payment: Payment) -> Result<Payment> {
        let req = self.core.prepare(&mut payment, ChannelType::Wechat, None)?;

        let code_url = retry_with_policy(
            &self.core.policy,
            "wechat_native_prepay",
            MallError::is_retryable,
            || with_timeout("wechat", self.core.call_timeout, self.core.client.native_prepay(&req)),
        )
        .await?;

        if let Some(record) = payment.record_mut(ChannelType::Wechat) {
            record.wechat_code_url = code_url;
        }
        self.core.persist_prepaid(payment, ChannelType::Wechat).await
    }

    async fn query_order_by_sn(&self, payment_sn: &str) -> Result<Payment> {
        self.core.query_order_by_sn(payment_sn).await
    }

    async fn handle_callback(&self, txn: &WechatTransaction) -> Result<()> {
        self.core.handle_callback(txn).await
    }
}

/// 微信 JSAPI（小程序）支付
pub struct WechatJsapiPaymentService {
    core: Arc<WechatCore>,
    users: Arc<dyn UserService>,
}

impl WechatJsapiPaymentService {
    pub fn new(core: Arc<WechatCore>, users: Arc<dyn UserService>) -> Self {
        Self { core, users }
    }
}

#[async_trait]
impl ChannelService for WechatJsapiPaymentService {
    fn channel(&self) -> ChannelType {
        ChannelType::WechatJs
    }

    async fn prepay(&self, mut payment: Payment) -> Result<Payment> {
        let payer_id = payment.payer_id;
        let openid = with_timeout(
            "user",
            self.core.call_timeout,
            self.users.find_wechat_mini_open_id(payer_id),
        )
        .await?;

        let req = self.core.prepare(&mut payment, ChannelType::WechatJs, Some(openid))?;

        let params = retry_with_policy(
            &self.core.policy,
            "wechat_jsapi_prepay",
            MallError::is_retryable,
            || with_timeout("wechat", self.core.call_timeout, self.core.client.jsapi_prepay(&req)),
        )
        .await?;

        let resp = serde_json::to_string(&params)?;
        if let Some(record) = payment.record_mut(ChannelType::WechatJs) {
            record.wechat_js_api_resp = resp;
        }
        self.core.persist_prepaid(payment, ChannelType::WechatJs).await
    }

    async fn query_order_by_sn(&self, payment_sn: &str) -> Result<Payment> {
        self.core.query_order_by_sn(payment_sn).await
    }

    async fn handle_callback(&self, txn: &WechatTransaction) -> Result<()> {
        self.core.handle_callback(txn).await
    }
}
