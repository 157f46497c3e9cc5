//! 积分服务客户端
//!
//! 积分扣减分三步：预扣（try）返回事务 ID，之后必须确认（confirm）
//! 或取消（cancel）其中之一。积分侧以 `key` 做幂等，重复调用安全。

use std::time::Duration;

use async_trait::async_trait;
use mall_shared::error::MallError;
use serde::{Deserialize, Serialize};

use super::JsonHttpClient;

/// 积分预扣请求
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeductCreditsRequest {
    pub uid: i64,
    pub amount: i64,
    /// 幂等键，取支付流水号
    pub key: String,
    pub biz: String,
    pub biz_id: i64,
    pub desc: String,
}

/// 积分服务
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CreditService: Send + Sync {
    /// 预扣积分，返回积分侧事务 ID
    async fn try_deduct_credits(&self, req: &DeductCreditsRequest) -> Result<String, MallError>;
    async fn confirm_deduct_credits(&self, uid: i64, tid: &str) -> Result<(), MallError>;
    async fn cancel_deduct_credits(&self, uid: i64, tid: &str) -> Result<(), MallError>;
}

#[derive(Debug, Deserialize)]
struct TryDeductResponse {
    tid: String,
}

#[derive(Debug, Serialize)]
struct TidRequest<'a> {
    uid: i64,
    tid: &'a str,
}

#[derive(Debug, Deserialize)]
struct Ack {}

/// 基于 HTTP 的积分服务客户端
pub struct HttpCreditClient {
    http: JsonHttpClient,
}

impl HttpCreditClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, MallError> {
        Ok(Self {
            http: JsonHttpClient::new("credit", base_url, timeout)?,
        })
    }
}

#[async_trait]
impl CreditService for HttpCreditClient {
    async fn try_deduct_credits(&self, req: &DeductCreditsRequest) -> Result<String, MallError> {
        let resp: TryDeductResponse = self.http.post("/credits/try-deduct", req).await?;
        Ok(resp.tid)
    }

    async fn confirm_deduct_credits(&self, uid: i64, tid: &str) -> Result<(), MallError> {
        let _: Ack = self
            .http
            .post("/credits/confirm-deduct", &TidRequest { uid, tid })
            .await?;
        Ok(())
    }

    async fn cancel_deduct_credits(&self, uid: i64, tid: &str) -> Result<(), MallError> {
        let _: Ack = self
            .http
            .post("/credits/cancel-deduct", &TidRequest { uid, tid })
            .await?;
        Ok(())
    }
}
