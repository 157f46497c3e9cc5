//! 支付渠道
//!
//! 每个渠道实现 `ChannelService`，由 `ChannelRegistry` 按渠道类型分发。
//! 新增渠道只需实现 trait 并注册，门面层无需修改。

mod credit;
mod wechat;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::clients::WechatTransaction;
use crate::error::{PaymentError, Result};
use crate::models::{ChannelType, Payment, PaymentStatus};

pub use credit::CreditPaymentService;
pub use wechat::{WechatCore, WechatJsapiPaymentService, WechatNativePaymentService};

/// 支付渠道服务
#[async_trait]
pub trait ChannelService: Send + Sync {
    fn channel(&self) -> ChannelType;

    /// 预支付：向渠道申请支付凭证并持久化支付单
    async fn prepay(&self, payment: Payment) -> Result<Payment>;

    /// 主动查询渠道侧结果并落库，返回最新的支付单
    async fn query_order_by_sn(&self, payment_sn: &str) -> Result<Payment>;

    /// 处理渠道异步回调
    ///
    /// 默认实现表示渠道没有异步回调。
    async fn handle_callback(&self, _txn: &WechatTransaction) -> Result<()> {
        Err(PaymentError::UnsupportedChannel(self.channel()))
    }
}

/// 渠道注册表
#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<ChannelType, Arc<dyn ChannelService>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册渠道，同类型重复注册时覆盖旧实现
    pub fn register(&mut self, service: Arc<dyn ChannelService>) {
        let channel = service.channel();
        if self.channels.insert(channel, service).is_some() {
            warn!(%channel, "支付渠道被重复注册，已覆盖");
        } else {
            info!(%channel, "注册支付渠道");
        }
    }

    pub fn get(&self, channel: ChannelType) -> Result<Arc<dyn ChannelService>> {
        self.channels
            .get(&channel)
            .cloned()
            .ok_or(PaymentError::UnsupportedChannel(channel))
    }
}

/// 微信交易状态到支付状态的映射
pub fn trade_state_to_status(trade_state: &str) -> Result<PaymentStatus> {
    match trade_state {
        "SUCCESS" => Ok(PaymentStatus::PaidSuccess),
        "PAYERROR" | "CLOSED" | "REVOKED" => Ok(PaymentStatus::PaidFailed),
        "NOTPAY" => Ok(PaymentStatus::Unpaid),
        "USERPAYING" => Ok(PaymentStatus::Processing),
        "REFUND" => Ok(PaymentStatus::Refund),
        other => Err(PaymentError::UnknownTradeState(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_state_mapping() {
        let cases = [
            ("SUCCESS", PaymentStatus::PaidSuccess),
            ("PAYERROR", PaymentStatus::PaidFailed),
            ("CLOSED", PaymentStatus::PaidFailed),
            ("REVOKED", PaymentStatus::PaidFailed),
            ("NOTPAY", PaymentStatus::Unpaid),
            ("USERPAYING", PaymentStatus::Processing),
            ("REFUND", PaymentStatus::Refund),
        ];
        for (state, expected) in cases {
            assert_eq!(trade_state_to_status(state).unwrap(), expected, "{state}");
        }
        assert!(matches!(
            trade_state_to_status("MYSTERY"),
            Err(PaymentError::UnknownTradeState(_))
        ));
    }
}
