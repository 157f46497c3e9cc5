//! 微信支付网关客户端
//!
//! 签名、验签与回调报文解密由网关完成，这里只处理已解密的业务字段。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mall_shared::config::ExternalConfig;
use mall_shared::error::MallError;
use serde::{Deserialize, Serialize};

use super::JsonHttpClient;

/// 预支付请求
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrepayRequest {
    pub description: String,
    pub out_trade_no: String,
    pub time_expire: DateTime<Utc>,
    /// 金额（分）
    pub amount_total: i64,
    /// JSAPI 支付必填
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer_openid: Option<String>,
}

/// 小程序调起支付所需参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsapiPrepayParams {
    pub prepay_id: String,
    pub app_id: String,
    pub time_stamp: String,
    pub nonce_str: String,
    pub package: String,
    pub sign_type: String,
    pub pay_sign: String,
}

/// 微信侧交易
///
/// 回调通知与主动查询返回相同的结构。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WechatTransaction {
    pub out_trade_no: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    pub trade_state: String,
    #[serde(default)]
    pub trade_state_desc: Option<String>,
}

/// 微信支付端口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WechatPayClient: Send + Sync {
    /// Native 下单，返回二维码链接
    async fn native_prepay(&self, req: &PrepayRequest) -> Result<String, MallError>;

    /// JSAPI 下单，返回已签名的小程序支付参数
    async fn jsapi_prepay(&self, req: &PrepayRequest) -> Result<JsapiPrepayParams, MallError>;

    async fn query_order_by_out_trade_no(
        &self,
        out_trade_no: &str,
    ) -> Result<WechatTransaction, MallError>;
}

#[derive(Debug, Serialize)]
struct GatewayPrepayBody<'a> {
    appid: &'a str,
    mchid: &'a str,
    notify_url: &'a str,
    #[serde(flatten)]
    req: &'a PrepayRequest,
}

#[derive(Debug, Deserialize)]
struct NativePrepayResponse {
    code_url: String,
}

/// 基于 HTTP 的微信支付网关客户端
pub struct HttpWechatPayClient {
    http: JsonHttpClient,
    app_id: String,
    mch_id: String,
    notify_url: String,
}

impl HttpWechatPayClient {
    pub fn new(config: &ExternalConfig, timeout: Duration) -> Result<Self, MallError> {
        Ok(Self {
            http: JsonHttpClient::new("wechat", &config.wechat_gateway_url, timeout)?,
            app_id: config.wechat_app_id.clone(),
            mch_id: config.wechat_mch_id.clone(),
            notify_url: config.wechat_notify_url.clone(),
        })
    }

    fn body<'a>(&'a self, req: &'a PrepayRequest) -> GatewayPrepayBody<'a> {
        GatewayPrepayBody {
            appid: &self.app_id,
            mchid: &self.mch_id,
            notify_url: &self.notify_url,
            req,
        }
    }
}

#[async_trait]
impl WechatPayClient for HttpWechatPayClient {
    async fn native_prepay(&self, req: &PrepayRequest) -> Result<String, MallError> {
        let resp: NativePrepayResponse = self
            .http
            .post("/v3/pay/transactions/native", &self.body(req))
            .await?;
        Ok(resp.code_url)
    }

    async fn jsapi_prepay(&self, req: &PrepayRequest) -> Result<JsapiPrepayParams, MallError> {
        if req.payer_openid.is_none() {
            return Err(MallError::Validation("JSAPI 下单缺少 openid".to_string()));
        }
        self.http
            .post("/v3/pay/transactions/jsapi", &self.body(req))
            .await
    }

    async fn query_order_by_out_trade_no(
        &self,
        out_trade_no: &str,
    ) -> Result<WechatTransaction, MallError> {
        self.http
            .get(
                &format!("/v3/pay/transactions/out-trade-no/{out_trade_no}"),
                &[("mchid", self.mch_id.as_str())],
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_from_callback_payload() {
        let txn: WechatTransaction = serde_json::from_str(
            r#"{"out_trade_no":"PAY1","transaction_id":"4200001","trade_state":"SUCCESS"}"#,
        )
        .unwrap();
        assert_eq!(txn.trade_state, "SUCCESS");
        assert_eq!(txn.transaction_id.as_deref(), Some("4200001"));

        let pending: WechatTransaction =
            serde_json::from_str(r#"{"out_trade_no":"PAY1","trade_state":"NOTPAY"}"#).unwrap();
        assert!(pending.transaction_id.is_none());
    }

    #[test]
    fn test_prepay_body_flattens_request() {
        let client = HttpWechatPayClient::new(
            &ExternalConfig {
                wechat_app_id: "wx-app".to_string(),
                wechat_mch_id: "mch-1".to_string(),
                ..Default::default()
            },
            Duration::from_secs(1),
        )
        .unwrap();
        let req = PrepayRequest {
            description: "商品订单".to_string(),
            out_trade_no: "PAY1".to_string(),
            time_expire: Utc::now(),
            amount_total: 700,
            payer_openid: None,
        };

        let json = serde_json::to_value(client.body(&req)).unwrap();
        assert_eq!(json["appid"], "wx-app");
        assert_eq!(json["out_trade_no"], "PAY1");
        assert!(json.get("payer_openid").is_none());
    }
}
