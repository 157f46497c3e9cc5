//! 订单服务
//!
//! 管理订单生命周期：创建 -> 关联支付 -> 成功 / 失败 / 取消 / 超时关闭。
//!
//! ## 模块结构
//!
//! - `models`: 订单与订单项
//! - `repository`: 数据库仓储层
//! - `service`: 订单生命周期操作
//! - `consumer`: 支付事件与完成订单事件的消费者
//! - `job`: 超时未支付订单关闭任务

pub mod consumer;
pub mod error;
pub mod job;
pub mod models;
pub mod repository;
pub mod service;

pub use error::{OrderError, Result};
pub use models::*;
pub use service::OrderService;
