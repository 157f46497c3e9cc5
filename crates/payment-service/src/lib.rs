//! 支付服务
//!
//! 负责支付单的完整生命周期：未支付 -> 处理中 -> 支付成功 / 支付失败 / 超时关闭。
//!
//! ## 核心功能
//!
//! - **积分支付**：try / confirm / cancel 三阶段扣减，同步完成支付
//! - **微信支付**：Native 扫码与 JSAPI 小程序预支付，异步回调落库
//! - **混合支付**：积分 + 微信，仅当所有渠道都成功时支付单才算成功
//! - **主动同步**：定时查询超时未决的微信支付单并强制收敛
//! - **支付事件**：支付结果通过消息总线通知订单服务
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `repository`: 数据库仓储层
//! - `clients`: 积分、微信、用户等外部服务客户端
//! - `saga`: 积分预扣的三态 saga
//! - `channel`: 各支付渠道的实现与分发表
//! - `service`: 对外的支付服务门面
//! - `job`: 微信支付单同步任务

pub mod channel;
pub mod clients;
pub mod error;
pub mod events;
pub mod job;
pub mod models;
pub mod repository;
pub mod saga;
pub mod service;

pub use error::{PaymentError, Result};
pub use models::*;
pub use service::PaymentService;
