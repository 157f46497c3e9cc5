//! 支付服务
//!
//! 组装支付渠道与外部客户端，并运行微信支付单同步任务。

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

use payment::{
    PaymentService,
    channel::{
        ChannelRegistry, CreditPaymentService, WechatCore, WechatJsapiPaymentService,
        WechatNativePaymentService,
    },
    clients::{HttpCreditClient, HttpUserClient, HttpWechatPayClient},
    events::PaymentEventProducer,
    job::SyncWechatOrderJob,
    repository::{PaymentRepository, PaymentRepositoryTrait},
    saga::CreditSaga,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置并初始化可观测性
    let config = AppConfig::load("payment-service").context("加载配置失败")?;
    let _guard = observability::init(&config.observability).await?;

    info!(environment = %config.environment, "Starting payment-service...");

    // 2. 基础设施
    let db = Database::connect(&config.database).await?;
    db.run_migrations().await?;
    let producer = Arc::new(KafkaProducer::new(&config.kafka)?);

    let call_timeout = config.timeouts.call_timeout();
    let policy = config.retry.policy();

    // 3. 外部客户端
    let credit_client = Arc::new(HttpCreditClient::new(&config.external.credit_url, call_timeout)?);
    let wechat_client = Arc::new(HttpWechatPayClient::new(&config.external, call_timeout)?);
    let user_client = Arc::new(HttpUserClient::new(&config.external.user_url, call_timeout)?);

    // 4. 仓储与渠道
    let repo: Arc<dyn PaymentRepositoryTrait> = Arc::new(PaymentRepository::new(db.pool().clone()));
    let events = PaymentEventProducer::new(producer);
    let saga = Arc::new(CreditSaga::new(credit_client, policy.clone(), call_timeout));

    let wechat_core = Arc::new(WechatCore::new(
        repo.clone(),
        wechat_client,
        saga.clone(),
        events.clone(),
        policy,
        call_timeout,
        config.timeouts.payment_expiry(),
    ));
    let mut channels = ChannelRegistry::new();
    channels.register(Arc::new(WechatNativePaymentService::new(wechat_core.clone())));
    channels.register(Arc::new(WechatJsapiPaymentService::new(wechat_core, user_client)));

    let credit = Arc::new(CreditPaymentService::new(repo.clone(), saga.clone(), events));
    let service = Arc::new(PaymentService::new(repo, credit, channels, saga));
    info!("Services initialized");

    // 5. 定时任务
    let mut scheduler = JobScheduler::new();
    scheduler.add(
        &config.jobs.sync_wechat_order_cron,
        Arc::new(SyncWechatOrderJob::new(
            service,
            config.timeouts.clone(),
            config.jobs.batch_size,
        )),
    )?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = tokio::spawn(scheduler.start(shutdown_rx));

    // 6. 等待关闭信号
    signal::ctrl_c().await?;
    info!("Received shutdown signal, stopping payment-service...");
    let _ = shutdown_tx.send(true);

    scheduler_handle.await?;
    db.close().await;
    info!("payment-service stopped");
    Ok(())
}
