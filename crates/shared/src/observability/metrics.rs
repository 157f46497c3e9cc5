//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use std::net::SocketAddr;
use std::sync::OnceLock;

use ::tracing::{error, info};
use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl MetricsHandle {
    pub fn abort(&self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("job_runs_total", "Total number of scheduled job runs");
    metrics::describe_gauge!(
        "job_last_run_timestamp_seconds",
        "Unix timestamp of the last finished job run"
    );
    metrics::describe_counter!(
        "reconcile_orders_total",
        "Orders visited by reconciliation, labelled by outcome"
    );
    metrics::describe_counter!(
        "payment_inconsistencies_total",
        "Payments left inconsistent and requiring manual reconciliation"
    );
    metrics::describe_counter!("events_consumed_total", "Total number of consumed events");
    metrics::describe_counter!("orders_closed_total", "Orders closed by the expiry job");

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录一次定时任务执行
#[inline]
pub fn record_job_run(job: &str, success: bool) {
    metrics::counter!(
        "job_runs_total",
        "job" => job.to_string(),
        "result" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// 记录任务最近一次运行时间，供告警判断任务是否存活
#[inline]
pub fn set_job_last_run(job: &str) {
    metrics::gauge!("job_last_run_timestamp_seconds", "job" => job.to_string())
        .set(chrono::Utc::now().timestamp() as f64);
}

/// 记录对账单笔订单的处理结果（converged / abandoned / skipped）
#[inline]
pub fn record_reconcile_outcome(outcome: &'static str) {
    metrics::counter!("reconcile_orders_total", "outcome" => outcome).increment(1);
}

/// 记录需要人工介入的支付不一致
#[inline]
pub fn record_payment_inconsistency(kind: &'static str) {
    metrics::counter!("payment_inconsistencies_total", "kind" => kind).increment(1);
}

#[inline]
pub fn record_event_consumed(topic: &str, success: bool) {
    metrics::counter!(
        "events_consumed_total",
        "topic" => topic.to_string(),
        "result" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

#[inline]
pub fn record_orders_closed(count: u64) {
    metrics::counter!("orders_closed_total").increment(count);
}
