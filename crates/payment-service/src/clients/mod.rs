//! 外部服务客户端
//!
//! 积分、微信支付网关、用户服务都以 trait 暴露给业务层，
//! 生产实现基于 reqwest 的 JSON over HTTP 调用。

mod credit;
mod user;
mod wechat;

use std::time::Duration;

use mall_shared::error::MallError;
use reqwest::{Client, Response};
use serde::{Serialize, de::DeserializeOwned};

pub use credit::{CreditService, DeductCreditsRequest, HttpCreditClient};
pub use user::{HttpUserClient, UserService};
pub use wechat::{
    HttpWechatPayClient, JsapiPrepayParams, PrepayRequest, WechatPayClient, WechatTransaction,
};

#[cfg(test)]
pub use credit::MockCreditService;
#[cfg(test)]
pub use user::MockUserService;
#[cfg(test)]
pub use wechat::MockWechatPayClient;

/// JSON HTTP 客户端
///
/// 统一把传输错误和非 2xx 响应映射为 `MallError::ExternalService`，
/// 超时由调用方通过 `with_timeout` 控制。
#[derive(Clone)]
pub(crate) struct JsonHttpClient {
    client: Client,
    base_url: String,
    service: &'static str,
}

impl JsonHttpClient {
    pub(crate) fn new(service: &'static str, base_url: &str, timeout: Duration) -> Result<Self, MallError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MallError::external(service, format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service,
        })
    }

    pub(crate) async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, MallError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| MallError::external(self.service, e))?;
        self.decode(resp).await
    }

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, MallError> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .send()
            .await
            .map_err(|e| MallError::external(self.service, e))?;
        self.decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(&self, resp: Response) -> Result<T, MallError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MallError::external(
                self.service,
                format!("HTTP {status}: {body}"),
            ));
        }
        resp.json::<T>()
            .await
            .map_err(|e| MallError::external(self.service, format!("响应解析失败: {e}")))
    }
}
