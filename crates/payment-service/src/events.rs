//! 支付事件生产者

use std::sync::Arc;

use mall_shared::error::MallError;
use mall_shared::events::{PaymentEvent, PaymentStatus};
use mall_shared::kafka::{EventPublisher, publish_json, topics};
use tracing::{debug, error};

use crate::models::Payment;

/// 向 `payment_events` 发布支付结果
#[derive(Clone)]
pub struct PaymentEventProducer {
    publisher: Arc<dyn EventPublisher>,
}

impl PaymentEventProducer {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    pub async fn produce(&self, event: &PaymentEvent) -> Result<(), MallError> {
        publish_json(
            self.publisher.as_ref(),
            topics::PAYMENT_EVENTS,
            &event.order_sn,
            event,
        )
        .await?;
        debug!(order_sn = %event.order_sn, status = %event.status, "支付事件已发送");
        Ok(())
    }

    /// 发送支付结果，失败只记录日志
    ///
    /// 事件丢失时订单会停留在处理中，由对账任务修复。
    pub async fn notify(&self, payment: &Payment, status: PaymentStatus) {
        let event = PaymentEvent {
            order_sn: payment.order_sn.clone(),
            payer_id: payment.payer_id,
            status,
        };
        if let Err(e) = self.produce(&event).await {
            error!(
                order_sn = %event.order_sn,
                status = %status,
                error = %e,
                "发送支付事件失败，等待对账修复"
            );
        }
    }
}
