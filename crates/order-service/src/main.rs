//! 订单服务
//!
//! 消费支付事件与完成订单事件，并定时关闭超时未支付订单。

use std::sync::Arc;

use anyhow::{Context, Result};
use mall_shared::{
    config::AppConfig,
    database::Database,
    job::JobScheduler,
    kafka::{KafkaConsumer, KafkaProducer, topics},
    observability,
};
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use order::{
    OrderService,
    consumer::{CompleteOrderConsumer, PaymentEventConsumer},
    job::CloseExpiredOrdersJob,
    repository::OrderRepository,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置并初始化可观测性
    let config = AppConfig::load("order-service").context("加载配置失败")?;
    let _guard = observability::init(&config.observability).await?;

    info!(environment = %config.environment, "Starting order-service...");

    // 2. 基础设施
    let db = Database::connect(&config.database).await?;
    db.run_migrations().await?;
    let producer = Arc::new(KafkaProducer::new(&config.kafka)?);

    // 3. 服务
    let repo = Arc::new(OrderRepository::new(db.pool().clone()));
    let orders = Arc::new(OrderService::new(repo));
    info!("Services initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    // 4. 消费者，每个 topic 独立消费组
    let payment_consumer = KafkaConsumer::new(&config.kafka, Some("payment-events"))?;
    payment_consumer.subscribe(&[topics::PAYMENT_EVENTS])?;
    let handler = Arc::new(PaymentEventConsumer::new(orders.clone(), producer));
    tasks.spawn(handler.run(payment_consumer, shutdown_rx.clone()));

    let complete_consumer = KafkaConsumer::new(&config.kafka, Some("complete-order-events"))?;
    complete_consumer.subscribe(&[topics::COMPLETE_ORDER_EVENTS])?;
    let handler = Arc::new(CompleteOrderConsumer::new(orders.clone()));
    tasks.spawn(handler.run(complete_consumer, shutdown_rx.clone()));

    // 5. 定时任务
    let mut scheduler = JobScheduler::new();
    scheduler.add(
        &config.jobs.close_expired_orders_cron,
        Arc::new(CloseExpiredOrdersJob::new(
            orders,
            config.timeouts.clone(),
            config.jobs.batch_size,
        )),
    )?;
    tasks.spawn(scheduler.start(shutdown_rx));

    // 6. 等待关闭信号
    signal::ctrl_c().await?;
    info!("Received shutdown signal, stopping order-service...");
    let _ = shutdown_tx.send(true);

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "后台任务异常退出");
        }
    }
    db.close().await;
    info!("order-service stopped");
    Ok(())
}
