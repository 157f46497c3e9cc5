//! 订单与支付对账任务

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mall_shared::config::TimeoutConfig;
use mall_shared::job::Job;
use tracing::info;

use crate::service::ReconciliationService;

pub struct SyncPaymentAndOrderJob {
    service: Arc<ReconciliationService>,
    timeouts: TimeoutConfig,
}

impl SyncPaymentAndOrderJob {
    pub fn new(service: Arc<ReconciliationService>, timeouts: TimeoutConfig) -> Self {
        Self { service, timeouts }
    }
}

#[async_trait]
impl Job for SyncPaymentAndOrderJob {
    fn name(&self) -> &str {
        "sync_payment_and_order"
    }

    /// 截止时间早于微信同步任务，只处理微信同步已经有机会修复过的订单
    async fn run(&self) -> anyhow::Result<()> {
        let cutoff = self.timeouts.recon_cutoff(Utc::now());
        let summary = self.service.reconcile(cutoff).await?;
        info!(
            converged = summary.converged,
            abandoned = summary.abandoned,
            skipped = summary.skipped,
            %cutoff,
            "对账任务完成"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use mall_shared::retry::RetryPolicy;

    use super::*;
    use crate::ports::{MockOrderClient, MockPaymentClient};

    #[tokio::test]
    async fn test_run_uses_recon_cutoff() {
        let timeouts = TimeoutConfig::default();
        let started = Utc::now();

        let mut orders = MockOrderClient::new();
        let expected = timeouts.clone();
        orders
            .expect_find_timeout_orders()
            .withf(move |offset, _, ctime: &DateTime<Utc>| {
                // 对账截止时间严格早于微信同步截止时间
                *offset == 0
                    && *ctime <= expected.recon_cutoff(Utc::now())
                    && *ctime >= expected.recon_cutoff(started)
                    && *ctime < expected.wechat_sync_cutoff(started)
            })
            .times(1)
            .returning(|_, _, _| Ok((vec![], 0)));

        let service = Arc::new(ReconciliationService::new(
            Arc::new(orders),
            Arc::new(MockPaymentClient::new()),
            RetryPolicy::default(),
            100,
        ));
        let job = SyncPaymentAndOrderJob::new(service, timeouts);
        assert_eq!(job.name(), "sync_payment_and_order");
        tokio_test::assert_ok!(job.run().await);
    }
}
