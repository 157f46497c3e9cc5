//! 对账服务
//!
//! 定时扫描长时间停留在 Processing 的订单，按支付单的实际状态
//! 强制订单、支付单与积分三方收敛。
//!
//! ## 模块结构
//!
//! - `ports`: 对账依赖的订单与支付能力，以及对两个服务的适配
//! - `service`: 对账收敛算法
//! - `job`: 对账定时任务

pub mod error;
pub mod job;
pub mod ports;
pub mod service;

pub use error::{ReconError, Result};
pub use service::{ReconcileSummary, ReconciliationService};
