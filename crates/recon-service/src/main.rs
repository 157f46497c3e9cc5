//! 对账服务
//!
//! 直接组装订单服务与支付服务的领域层，定时修复订单与支付单的不一致。

use std::sync::Arc;

use anyhow::{Context, Result};
use mall_shared::{
    config::AppConfig,
    database::Database,
    job::JobScheduler,
    kafka::KafkaProducer,
    observability,
};
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

use order::{OrderService, repository::OrderRepository};
use payment::{
    PaymentService,
    channel::{
        ChannelRegistry, CreditPaymentService, WechatCore, WechatJsapiPaymentService,
        WechatNativePaymentService,
    },
    clients::{HttpCreditClient, HttpUserClient, HttpWechatPayClient},
    events::PaymentEventProducer,
    repository::{PaymentRepository, PaymentRepositoryTrait},
    saga::CreditSaga,
};
use recon::{ReconciliationService, job::SyncPaymentAndOrderJob};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置并初始化可观测性
    let config = AppConfig::load("recon-service").context("加载配置失败")?;
    let _guard = observability::init(&config.observability).await?;

    info!(environment = %config.environment, "Starting recon-service...");

    // 2. 基础设施
    let db = Database::connect(&config.database).await?;
    db.run_migrations().await?;
    let producer = Arc::new(KafkaProducer::new(&config.kafka)?);

    let call_timeout = config.timeouts.call_timeout();
    let policy = config.retry.policy();

    // 3. 订单服务
    let orders = Arc::new(OrderService::new(Arc::new(OrderRepository::new(
        db.pool().clone(),
    ))));

    // 4. 支付服务，强制失败后可能需要结算积分
    let credit_client = Arc::new(HttpCreditClient::new(&config.external.credit_url, call_timeout)?);
    let wechat_client = Arc::new(HttpWechatPayClient::new(&config.external, call_timeout)?);
    let user_client = Arc::new(HttpUserClient::new(&config.external.user_url, call_timeout)?);

    let repo: Arc<dyn PaymentRepositoryTrait> = Arc::new(PaymentRepository::new(db.pool().clone()));
    let events = PaymentEventProducer::new(producer);
    let saga = Arc::new(CreditSaga::new(credit_client, policy.clone(), call_timeout));
    let wechat_core = Arc::new(WechatCore::new(
        repo.clone(),
        wechat_client,
        saga.clone(),
        events.clone(),
        policy.clone(),
        call_timeout,
        config.timeouts.payment_expiry(),
    ));
    let mut channels = ChannelRegistry::new();
    channels.register(Arc::new(WechatNativePaymentService::new(wechat_core.clone())));
    channels.register(Arc::new(WechatJsapiPaymentService::new(wechat_core, user_client)));
    let credit = Arc::new(CreditPaymentService::new(repo.clone(), saga.clone(), events));
    let payments = Arc::new(PaymentService::new(repo, credit, channels, saga));

    // 5. 对账服务
    let recon = Arc::new(ReconciliationService::new(
        orders,
        payments,
        policy,
        config.jobs.batch_size,
    ));
    info!("Services initialized");

    let mut scheduler = JobScheduler::new();
    scheduler.add(
        &config.jobs.sync_payment_and_order_cron,
        Arc::new(SyncPaymentAndOrderJob::new(recon, config.timeouts.clone())),
    )?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = tokio::spawn(scheduler.start(shutdown_rx));

    // 6. 等待关闭信号
    signal::ctrl_c().await?;
    info!("Received shutdown signal, stopping recon-service...");
    let _ = shutdown_tx.send(true);

    scheduler_handle.await?;
    db.close().await;
    info!("recon-service stopped");
    Ok(())
}
