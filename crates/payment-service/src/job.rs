//! 微信支付单同步任务
//!
//! 回调可能丢失，定时扫描超过有效期仍未决的微信支付单并主动查询结果。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mall_shared::config::TimeoutConfig;
use mall_shared::job::Job;
use tracing::{error, info};

use crate::service::PaymentService;

pub struct SyncWechatOrderJob {
    service: Arc<PaymentService>,
    timeouts: TimeoutConfig,
    batch_size: i64,
}

impl SyncWechatOrderJob {
    pub fn new(service: Arc<PaymentService>, timeouts: TimeoutConfig, batch_size: i64) -> Self {
        Self {
            service,
            timeouts,
            batch_size,
        }
    }
}

#[async_trait]
impl Job for SyncWechatOrderJob {
    fn name(&self) -> &str {
        "sync_wechat_order"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let cutoff = self.timeouts.wechat_sync_cutoff(Utc::now());
        let mut offset = 0;
        let (mut synced, mut failed) = (0u64, 0u64);

        loop {
            let (payments, total) = self
                .service
                .find_timeout_payments(offset, self.batch_size, cutoff)
                .await?;

            // 已终结的支付单离开待同步集合，偏移量只跨过仍留在集合中的行
            let mut resolved = 0;
            for payment in &payments {
                match self.service.sync_payment(payment).await {
                    Ok(updated) => {
                        synced += 1;
                        if !updated.status.is_pending() {
                            resolved += 1;
                        }
                        info!(payment_sn = %updated.sn, status = %updated.status, "微信支付单已同步");
                    }
                    Err(e) => {
                        failed += 1;
                        error!(payment_sn = %payment.sn, error = %e, "同步微信支付单失败");
                    }
                }
            }

            if (payments.len() as i64) < self.batch_size {
                break;
            }
            offset += payments.len() as i64 - resolved;
            if offset >= total - resolved {
                break;
            }
        }

        info!(synced, failed, %cutoff, "微信支付单同步完成");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mall_shared::retry::RetryPolicy;

    use super::*;
    use crate::channel::{ChannelRegistry, CreditPaymentService, WechatCore, WechatNativePaymentService};
    use crate::clients::{MockCreditService, MockWechatPayClient, WechatTransaction};
    use crate::events::PaymentEventProducer;
    use crate::events::testing::RecordingPublisher;
    use crate::models::{ChannelType, Payment, PaymentRecord, PaymentStatus};
    use crate::repository::PaymentRepositoryTrait;
    use crate::repository::memory::InMemoryPaymentRepository;
    use crate::saga::CreditSaga;

    fn expired_wechat_payment(order_id: i64) -> Payment {
        let mut payment = Payment::new(
            1,
            order_id,
            format!("order-{order_id}"),
            vec![PaymentRecord::new(ChannelType::Wechat, 10)],
        );
        payment.sn = format!("PAY-{order_id}");
        payment.status = PaymentStatus::Processing;
        payment.ctime = Utc::now() - chrono::Duration::hours(2);
        payment
    }

    #[tokio::test]
    async fn test_sync_visits_every_payment_while_pages_shrink() {
        let store = Arc::new(InMemoryPaymentRepository::default());
        for order_id in 1..=6 {
            store.insert(expired_wechat_payment(order_id));
        }

        // 每笔都在微信侧支付成功，同步后离开待同步集合
        let mut wechat = MockWechatPayClient::new();
        wechat
            .expect_query_order_by_out_trade_no()
            .times(6)
            .returning(|sn| {
                Ok(WechatTransaction {
                    out_trade_no: sn.to_string(),
                    transaction_id: Some(format!("wx-{sn}")),
                    trade_state: "SUCCESS".to_string(),
                    trade_state_desc: None,
                })
            });

        let repo: Arc<dyn PaymentRepositoryTrait> = store.clone();
        let policy = RetryPolicy::default();
        let saga = Arc::new(CreditSaga::new(
            Arc::new(MockCreditService::new()),
            policy.clone(),
            Duration::from_millis(100),
        ));
        let publisher = Arc::new(RecordingPublisher::default());
        let events = PaymentEventProducer::new(publisher.clone());
        let core = Arc::new(WechatCore::new(
            repo.clone(),
            Arc::new(wechat),
            saga.clone(),
            events.clone(),
            policy,
            Duration::from_millis(100),
            chrono::Duration::minutes(30),
        ));
        let mut channels = ChannelRegistry::new();
        channels.register(Arc::new(WechatNativePaymentService::new(core)));
        let credit = Arc::new(CreditPaymentService::new(repo.clone(), saga.clone(), events));
        let service = Arc::new(PaymentService::new(repo, credit, channels, saga));

        let job = SyncWechatOrderJob::new(service, TimeoutConfig::default(), 2);
        tokio_test::assert_ok!(job.run().await);

        for order_id in 1..=6 {
            assert_eq!(
                store.status_of(&format!("PAY-{order_id}")),
                Some(PaymentStatus::PaidSuccess)
            );
        }
        assert_eq!(publisher.payment_events().len(), 6);
    }
}
