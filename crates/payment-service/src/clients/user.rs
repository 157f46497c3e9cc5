//! 用户服务客户端，JSAPI 支付需要小程序 openid

use std::time::Duration;

use async_trait::async_trait;
use mall_shared::error::MallError;
use serde::Deserialize;

use super::JsonHttpClient;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserService: Send + Sync {
    async fn find_wechat_mini_open_id(&self, uid: i64) -> Result<String, MallError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserProfile {
    #[serde(default)]
    wechat_mini_open_id: String,
}

pub struct HttpUserClient {
    http: JsonHttpClient,
}

impl HttpUserClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, MallError> {
        Ok(Self {
            http: JsonHttpClient::new("user", base_url, timeout)?,
        })
    }
}

#[async_trait]
impl UserService for HttpUserClient {
    async fn find_wechat_mini_open_id(&self, uid: i64) -> Result<String, MallError> {
        let profile: UserProfile = self.http.get(&format!("/users/{uid}"), &[]).await?;
        if profile.wechat_mini_open_id.is_empty() {
            return Err(MallError::Validation(format!("用户 {uid} 未绑定微信小程序")));
        }
        Ok(profile.wechat_mini_open_id)
    }
}
