//! 订单与支付对账
//!
//! 支付事件可能丢失或延迟，订单因此长时间停留在 Processing。对账以支付单状态为准：
//!
//! | 支付单状态 | 处理 |
//! |---|---|
//! | Unpaid / Processing | 强制置为失败后按失败收敛 |
//! | PaidSuccess | 确认积分，订单置为成功 |
//! | PaidFailed / TimeoutClosed | 取消积分，订单置为失败 |
//! | Refund | 跳过并告警 |
//!
//! 收敛循环共享一份退避预算：积分结算、订单迁移、重读订单任何一步失败或重读后
//! 仍未配对都会消耗一次重试，预算耗尽则放弃该订单，继续扫描。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mall_shared::observability::metrics;
use mall_shared::retry::RetryPolicy;
use order::{Order, OrderStatus};
use payment::{Payment, PaymentStatus};
use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::ports::{OrderClient, PaymentClient};

/// 单笔订单的对账结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Converged,
    Abandoned,
    Skipped,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Converged => "converged",
            Self::Abandoned => "abandoned",
            Self::Skipped => "skipped",
        }
    }
}

/// 一次对账的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub converged: u64,
    pub abandoned: u64,
    pub skipped: u64,
}

impl ReconcileSummary {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Converged => self.converged += 1,
            Outcome::Abandoned => self.abandoned += 1,
            Outcome::Skipped => self.skipped += 1,
        }
        metrics::record_reconcile_outcome(outcome.as_str());
    }
}

/// 支付单终态对应的订单目标状态；未决或退款返回 None
fn target_order_status(status: PaymentStatus) -> Option<OrderStatus> {
    match status {
        PaymentStatus::PaidSuccess => Some(OrderStatus::Success),
        s if s.is_failure() => Some(OrderStatus::Failed),
        _ => None,
    }
}

pub struct ReconciliationService {
    orders: Arc<dyn OrderClient>,
    payments: Arc<dyn PaymentClient>,
    policy: RetryPolicy,
    batch_size: i64,
}

impl ReconciliationService {
    pub fn new(
        orders: Arc<dyn OrderClient>,
        payments: Arc<dyn PaymentClient>,
        policy: RetryPolicy,
        batch_size: i64,
    ) -> Self {
        Self {
            orders,
            payments,
            policy,
            batch_size,
        }
    }

    /// 对 `cutoff` 之前创建、仍为 Processing 的订单逐一对账
    ///
    /// 只有分页查询失败会中断本次对账，单笔订单的失败都被隔离。
    #[instrument(skip(self))]
    pub async fn reconcile(&self, cutoff: DateTime<Utc>) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();
        let mut offset = 0;

        loop {
            let (orders, total) = self
                .orders
                .find_timeout_orders(offset, self.batch_size, cutoff)
                .await?;
            if orders.is_empty() {
                break;
            }

            let mut converged = 0i64;
            for order in &orders {
                let outcome = self.reconcile_order(order).await;
                if outcome == Outcome::Converged {
                    converged += 1;
                }
                summary.record(outcome);
            }

            if (orders.len() as i64) < self.batch_size {
                break;
            }
            // 已收敛的订单离开 Processing 结果集，偏移只跳过留下来的部分
            offset += orders.len() as i64 - converged;
            if offset >= total - converged {
                break;
            }
        }

        info!(
            converged = summary.converged,
            abandoned = summary.abandoned,
            skipped = summary.skipped,
            "对账完成"
        );
        Ok(summary)
    }

    #[instrument(skip(self, order), fields(order_sn = %order.sn, payment_id = order.payment_id))]
    async fn reconcile_order(&self, order: &Order) -> Outcome {
        let mut payment = match self.payments.find_payment_by_id(order.payment_id).await {
            Ok(payment) => payment,
            Err(e) => {
                error!(error = %e, "查询订单对应的支付单失败，跳过");
                return Outcome::Skipped;
            }
        };

        let mut backoff = self.policy.backoff();
        loop {
            match self.converge_once(order, &mut payment).await {
                Ok(Some(outcome)) => {
                    if outcome == Outcome::Converged {
                        info!(status = %payment.status, retries = backoff.retries(), "订单已收敛");
                    }
                    return outcome;
                }
                Ok(None) => {
                    warn!(status = %payment.status, "订单与支付单尚未配对，稍后重试");
                }
                Err(e) if e.is_consistency_violation() => {
                    error!(status = %payment.status, error = %e, "订单终态与支付结果矛盾，需要人工处理");
                    metrics::record_payment_inconsistency("order_payment_mismatch");
                    return Outcome::Abandoned;
                }
                Err(e) => {
                    warn!(error = %e, "对账步骤失败，退避后重试");
                }
            }

            if !backoff.wait().await {
                warn!(
                    retries = backoff.retries(),
                    status = %payment.status,
                    "重试预算耗尽，放弃该订单"
                );
                return Outcome::Abandoned;
            }
        }
    }

    /// 执行一轮收敛；订单与支付单配对时返回 `Some(Converged)`，仍需重试时返回 None
    async fn converge_once(&self, order: &Order, payment: &mut Payment) -> Result<Option<Outcome>> {
        if payment.status.is_pending() {
            self.payments.set_payment_status_paid_failed(payment).await?;
        }

        if payment.status == PaymentStatus::Refund {
            warn!("支付单已退款，不参与对账");
            return Ok(Some(Outcome::Skipped));
        }
        let Some(target) = target_order_status(payment.status) else {
            return Ok(None);
        };

        self.payments.handle_credit_callback(payment).await?;
        match target {
            OrderStatus::Success => self.orders.succeed_order(order.buyer_id, &order.sn).await?,
            _ => self.orders.fail_order(order.buyer_id, &order.sn).await?,
        }

        let current = self
            .orders
            .find_order_by_uid_and_sn(order.buyer_id, &order.sn)
            .await?;
        if current.status == target {
            Ok(Some(Outcome::Converged))
        } else {
            Ok(None)
        }
    }
}
