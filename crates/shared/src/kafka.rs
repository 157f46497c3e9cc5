//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为 Producer/Consumer 抽象，统一消息序列化、
//! 错误映射和优雅关闭语义。业务代码只依赖 `EventPublisher` trait，
//! 测试时可以替换为内存实现。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::MallError;

// ---------------------------------------------------------------------------
// Topic 常量
// ---------------------------------------------------------------------------

pub mod topics {
    /// 支付结果事件，由支付服务产生、订单服务消费
    pub const PAYMENT_EVENTS: &str = "payment_events";
    /// 订单完成事件，供商品、营销等下游模块消费
    pub const ORDER_EVENTS: &str = "order_events";
    /// 外部模块要求完成订单（如兑换码、零元单）
    pub const COMPLETE_ORDER_EVENTS: &str = "complete_order_events";
}

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 `BorrowedMessage` 转换为拥有所有权的结构体，使消息可以跨 await 点传递。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp: msg.timestamp().to_millis(),
            headers,
        }
    }

    /// 构造一条本地消息，用于测试或重放
    pub fn from_json<T: Serialize>(topic: &str, value: &T) -> Result<Self, MallError> {
        Ok(Self {
            topic: topic.to_string(),
            partition: 0,
            offset: 0,
            key: None,
            payload: serde_json::to_vec(value)?,
            timestamp: None,
            headers: HashMap::new(),
        })
    }

    /// 将 JSON 格式负载反序列化为目标类型
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T, MallError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| MallError::Kafka(format!("负载反序列化失败: {e}")))
    }
}

// ---------------------------------------------------------------------------
// EventPublisher
// ---------------------------------------------------------------------------

/// 事件发布抽象
///
/// 消息总线语义为至少一次投递，消费方必须幂等。
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), MallError>;
}

/// 将值序列化为 JSON 后发布
///
/// 序列化与发送拆分为两步，便于独立定位故障原因。
pub async fn publish_json<T: Serialize + ?Sized>(
    publisher: &dyn EventPublisher,
    topic: &str,
    key: &str,
    value: &T,
) -> Result<(), MallError> {
    let payload = serde_json::to_vec(value)?;
    publisher.publish(topic, key, payload).await
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// Kafka 生产者
///
/// `FutureProducer` 内部是 Arc 包装的，克隆成本很低。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    /// 根据配置创建生产者
    ///
    /// `message.timeout.ms` 设为 5 秒，超时后由上层决定重试。
    pub fn new(config: &KafkaConfig) -> Result<Self, MallError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| MallError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self { producer })
    }
}

#[async_trait]
impl EventPublisher for KafkaProducer {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), MallError> {
        let record = FutureRecord::to(topic).key(key).payload(&payload);

        let delivery = self
            .producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| MallError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// Kafka 消费者
///
/// 基于 `watch` channel 的优雅关闭：收到关闭信号后，正在执行的 handler
/// 自然完成，然后退出循环。消息逐条同步处理，天然有界。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    /// 创建消费者
    ///
    /// `group_id_suffix` 允许同一服务内不同 topic 使用独立的消费组。
    pub fn new(config: &KafkaConfig, group_id_suffix: Option<&str>) -> Result<Self, MallError> {
        let group_id = match group_id_suffix {
            Some(suffix) => format!("{}.{}", config.consumer_group, suffix),
            None => config.consumer_group.clone(),
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .create()
            .map_err(|e| MallError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id, "Kafka 消费者已初始化");
        Ok(Self { consumer })
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), MallError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| MallError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 启动消费循环
    ///
    /// handler 返回错误只记录日志而不中断循环，单条坏消息不会让消费者停止。
    pub async fn start<F, Fut>(self, mut shutdown: watch::Receiver<bool>, handler: F)
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: std::future::Future<Output = Result<(), MallError>>,
    {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        info!("Kafka 消费循环已启动");

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("收到关闭信号，Kafka 消费循环退出");
                        break;
                    }
                }

                msg_result = stream.next() => {
                    let Some(msg_result) = msg_result else {
                        warn!("Kafka 消息流意外结束");
                        break;
                    };

                    match msg_result {
                        Ok(borrowed_msg) => {
                            let msg = ConsumerMessage::from_borrowed(&borrowed_msg);
                            debug!(
                                topic = %msg.topic,
                                partition = msg.partition,
                                offset = msg.offset,
                                "收到 Kafka 消息"
                            );

                            if let Err(e) = handler(msg).await {
                                error!(error = %e, "处理 Kafka 消息失败");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "接收 Kafka 消息出错");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_consumer_message_deserialize() {
        #[derive(Debug, serde::Deserialize, serde::Serialize, PartialEq)]
        struct Event {
            sn: String,
            #[serde(rename = "buyerId")]
            buyer_id: i64,
        }

        let msg = ConsumerMessage::from_json(
            topics::COMPLETE_ORDER_EVENTS,
            &Event {
                sn: "sn-1".to_string(),
                buyer_id: 7,
            },
        )
        .unwrap();

        assert_eq!(msg.topic, "complete_order_events");
        let event: Event = msg.deserialize_payload().unwrap();
        assert_eq!(event.buyer_id, 7);
    }

    #[test]
    fn test_consumer_message_deserialize_invalid_json() {
        let msg = ConsumerMessage {
            topic: "events".to_string(),
            partition: 0,
            offset: 0,
            key: None,
            payload: b"not json".to_vec(),
            timestamp: None,
            headers: HashMap::new(),
        };

        let result: Result<serde_json::Value, _> = msg.deserialize_payload();
        assert!(matches!(result, Err(MallError::Kafka(_))));
    }

    struct Recorder(Mutex<Vec<(String, String, Vec<u8>)>>);

    #[async_trait]
    impl EventPublisher for Recorder {
        async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), MallError> {
            self.0
                .lock()
                .unwrap()
                .push((topic.to_string(), key.to_string(), payload));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publish_json_serializes_payload() {
        let recorder = Recorder(Mutex::new(Vec::new()));
        publish_json(
            &recorder,
            topics::ORDER_EVENTS,
            "order-1",
            &serde_json::json!({"orderSN": "order-1"}),
        )
        .await
        .unwrap();

        let sent = recorder.0.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "order_events");
        assert_eq!(sent[0].2, br#"{"orderSN":"order-1"}"#.to_vec());
    }
}
