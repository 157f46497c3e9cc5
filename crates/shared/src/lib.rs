//! 共享库
//!
//! 订单、支付、对账三个服务共用的配置、错误处理、数据库连接、Kafka、
//! 重试与定时任务调度等基础设施代码。

pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod job;
pub mod kafka;
pub mod observability;
pub mod retry;
