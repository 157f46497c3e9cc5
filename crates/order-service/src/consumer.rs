//! 订单服务的事件消费者
//!
//! - `payment_events`：支付成功则完成订单并发布 `OrderEvent`，失败类状态则置订单失败
//! - `complete_order_events`：外部模块要求直接完成订单
//!
//! 消息至少投递一次，处理逻辑必须幂等；handler 返回的错误由消费循环记录。

use std::sync::Arc;

use mall_shared::error::MallError;
use mall_shared::events::{CompleteOrderEvent, OrderEvent, OrderEventSpu, PaymentEvent, PaymentStatus};
use mall_shared::kafka::{ConsumerMessage, EventPublisher, KafkaConsumer, publish_json, topics};
use mall_shared::observability::metrics;
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::service::OrderService;

/// 支付事件消费者
pub struct PaymentEventConsumer {
    orders: Arc<OrderService>,
    publisher: Arc<dyn EventPublisher>,
}

impl PaymentEventConsumer {
    pub fn new(orders: Arc<OrderService>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { orders, publisher }
    }

    #[instrument(skip(self, event), fields(order_sn = %event.order_sn, status = %event.status))]
    pub async fn handle(&self, event: &PaymentEvent) -> Result<()> {
        match event.status {
            PaymentStatus::PaidSuccess => {
                self.orders.complete_order(event.payer_id, &event.order_sn).await?;
                self.publish_order_event(event).await
            }
            status if status.is_failure() => {
                self.orders.fail_order(event.payer_id, &event.order_sn).await
            }
            _ => {
                debug!("非终态支付事件，忽略");
                Ok(())
            }
        }
    }

    /// 通知下游订单已完成，携带购买的商品及数量
    async fn publish_order_event(&self, event: &PaymentEvent) -> Result<()> {
        let order = self
            .orders
            .find_order_by_uid_and_sn(event.payer_id, &event.order_sn)
            .await?;

        let order_event = OrderEvent {
            order_sn: order.sn.clone(),
            buyer_id: order.buyer_id,
            spus: order
                .items
                .iter()
                .map(|item| OrderEventSpu {
                    id: item.spu_id,
                    cnt: item.quantity,
                })
                .collect(),
        };

        publish_json(
            self.publisher.as_ref(),
            topics::ORDER_EVENTS,
            &order_event.order_sn,
            &order_event,
        )
        .await?;
        info!(spus = order_event.spus.len(), "订单完成事件已发送");
        Ok(())
    }

    pub async fn handle_message(&self, msg: &ConsumerMessage) -> std::result::Result<(), MallError> {
        let event: PaymentEvent = msg.deserialize_payload()?;
        let result = self.handle(&event).await.map_err(MallError::from);
        metrics::record_event_consumed(&msg.topic, result.is_ok());
        result
    }

    /// 运行消费循环直到收到关闭信号
    pub async fn run(self: Arc<Self>, consumer: KafkaConsumer, shutdown: watch::Receiver<bool>) {
        consumer
            .start(shutdown, move |msg| {
                let this = self.clone();
                async move { this.handle_message(&msg).await }
            })
            .await;
    }
}

/// 完成订单事件消费者
pub struct CompleteOrderConsumer {
    orders: Arc<OrderService>,
}

impl CompleteOrderConsumer {
    pub fn new(orders: Arc<OrderService>) -> Self {
        Self { orders }
    }

    pub async fn handle(&self, event: &CompleteOrderEvent) -> Result<()> {
        self.orders.complete_order(event.buyer_id, &event.sn).await
    }

    pub async fn handle_message(&self, msg: &ConsumerMessage) -> std::result::Result<(), MallError> {
        let event: CompleteOrderEvent = msg.deserialize_payload()?;
        let result = self.handle(&event).await.map_err(MallError::from);
        metrics::record_event_consumed(&msg.topic, result.is_ok());
        result
    }

    pub async fn run(self: Arc<Self>, consumer: KafkaConsumer, shutdown: watch::Receiver<bool>) {
        consumer
            .start(shutdown, move |msg| {
                let this = self.clone();
                async move { this.handle_message(&msg).await }
            })
            .await;
    }
}
