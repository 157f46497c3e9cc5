//! 定时任务抽象与 cron 调度器
//!
//! 每个任务实现 `Job`，由 `JobScheduler` 按 cron 表达式驱动。
//! 同一个任务在一次触发内顺序执行，上一次未结束时不会重入；
//! 关闭信号到达后调度循环在当前任务完成后退出。

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use cron::Schedule;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::MallError;
use crate::observability::metrics;

/// 定时任务
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> anyhow::Result<()>;
}

/// cron 调度器
#[derive(Default)]
pub struct JobScheduler {
    entries: Vec<(Schedule, Arc<dyn Job>)>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册任务，cron 表达式包含秒字段（如 `0 */5 * * * *`）
    pub fn add(&mut self, cron_expression: &str, job: Arc<dyn Job>) -> Result<&mut Self, MallError> {
        let schedule = Schedule::from_str(cron_expression).map_err(|e| {
            MallError::Config(format!(
                "任务 {} 的 cron 表达式无效 '{}': {}",
                job.name(),
                cron_expression,
                e
            ))
        })?;

        info!(job = job.name(), cron = cron_expression, "注册定时任务");
        self.entries.push((schedule, job));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 启动所有任务并等待它们在关闭信号后退出
    pub async fn start(self, shutdown: watch::Receiver<bool>) {
        let mut tasks = JoinSet::new();
        for (schedule, job) in self.entries {
            tasks.spawn(run_schedule(schedule, job, shutdown.clone()));
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "定时任务循环异常退出");
            }
        }
        info!("所有定时任务已停止");
    }
}

async fn run_schedule(schedule: Schedule, job: Arc<dyn Job>, mut shutdown: watch::Receiver<bool>) {
    info!(job = job.name(), "定时任务循环已启动");

    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            warn!(job = job.name(), "cron 表达式没有后续触发时间，任务退出");
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(job = job.name(), "收到关闭信号，定时任务循环退出");
                    break;
                }
            }

            _ = tokio::time::sleep(wait) => {
                run_once(job.as_ref()).await;
            }
        }
    }
}

/// 执行一次任务并记录耗时与结果
///
/// 任务错误只记录，不影响下一次触发。
pub async fn run_once(job: &dyn Job) -> bool {
    let start = Instant::now();
    info!(job = job.name(), "定时任务开始执行");

    let ok = match job.run().await {
        Ok(()) => {
            info!(
                job = job.name(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "定时任务执行完成"
            );
            true
        }
        Err(e) => {
            error!(
                job = job.name(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                error = %e,
                "定时任务执行失败"
            );
            false
        }
    };

    metrics::record_job_run(job.name(), ok);
    metrics::set_job_last_run(job.name());
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingJob {
        runs: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &str {
            "counting"
        }

        async fn run(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("模拟失败");
            }
            Ok(())
        }
    }

    #[test]
    fn test_add_rejects_invalid_cron() {
        let mut scheduler = JobScheduler::new();
        let job = Arc::new(CountingJob {
            runs: AtomicU32::new(0),
            fail: false,
        });
        assert!(matches!(
            scheduler.add("not a cron", job.clone()),
            Err(MallError::Config(_))
        ));
        assert!(scheduler.add("0 */5 * * * *", job).is_ok());
        assert_eq!(scheduler.len(), 1);
    }

    #[tokio::test]
    async fn test_run_once_reports_result() {
        let ok_job = CountingJob {
            runs: AtomicU32::new(0),
            fail: false,
        };
        let failing_job = CountingJob {
            runs: AtomicU32::new(0),
            fail: true,
        };

        assert!(run_once(&ok_job).await);
        assert!(!run_once(&failing_job).await);
        assert_eq!(ok_job.runs.load(Ordering::SeqCst), 1);
        assert_eq!(failing_job.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scheduler_runs_and_stops_on_shutdown() {
        let job = Arc::new(CountingJob {
            runs: AtomicU32::new(0),
            fail: false,
        });
        let mut scheduler = JobScheduler::new();
        // 每秒触发一次
        scheduler.add("* * * * * *", job.clone()).unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.start(rx));

        tokio::time::sleep(Duration::from_millis(2200)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(job.runs.load(Ordering::SeqCst) >= 1);
    }
}
