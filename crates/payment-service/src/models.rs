//! 支付领域模型
//!
//! 一个支付单（`Payment`）对应一个订单，由一条或多条渠道支付记录
//! （`PaymentRecord`）组成。混合支付时积分记录与微信记录并存，
//! 支付单只有在所有记录都成功时才算成功。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub use mall_shared::events::PaymentStatus;

/// 支付渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(into = "u8", try_from = "u8")]
#[repr(i16)]
pub enum ChannelType {
    Credit = 1,
    Wechat = 2,
    WechatJs = 3,
}

impl ChannelType {
    pub fn is_wechat(self) -> bool {
        matches!(self, Self::Wechat | Self::WechatJs)
    }
}

impl From<ChannelType> for u8 {
    fn from(channel: ChannelType) -> Self {
        channel as u8
    }
}

impl TryFrom<u8> for ChannelType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Credit),
            2 => Ok(Self::Wechat),
            3 => Ok(Self::WechatJs),
            other => Err(format!("未知的支付渠道: {other}")),
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Credit => "credit",
            Self::Wechat => "wechat_native",
            Self::WechatJs => "wechat_jsapi",
        };
        write!(f, "{s}")
    }
}

/// 渠道支付记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PaymentRecord {
    pub payment_id: i64,
    pub channel: ChannelType,
    /// 本渠道支付金额（分 / 积分）
    pub amount: i64,
    /// 第三方单号：积分为预扣事务 ID，微信为 transaction_id
    pub payment_no_3rd: String,
    pub status: PaymentStatus,
    pub description: String,
    pub wechat_code_url: String,
    /// JSAPI 预支付参数（JSON 文本），原样透传给小程序
    pub wechat_js_api_resp: String,
    pub paid_at: Option<DateTime<Utc>>,
}

impl PaymentRecord {
    pub fn new(channel: ChannelType, amount: i64) -> Self {
        Self {
            payment_id: 0,
            channel,
            amount,
            payment_no_3rd: String::new(),
            status: PaymentStatus::Unpaid,
            description: String::new(),
            wechat_code_url: String::new(),
            wechat_js_api_resp: String::new(),
            paid_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// 支付单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: i64,
    pub sn: String,
    pub payer_id: i64,
    pub order_id: i64,
    pub order_sn: String,
    pub total_amount: i64,
    pub status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    /// 支付截止时间，微信预支付时写入
    pub pay_ddl: Option<DateTime<Utc>>,
    #[sqlx(skip)]
    pub records: Vec<PaymentRecord>,
    pub ctime: DateTime<Utc>,
    pub utime: DateTime<Utc>,
}

impl Payment {
    /// 创建一个尚未持久化的支付单
    pub fn new(payer_id: i64, order_id: i64, order_sn: impl Into<String>, records: Vec<PaymentRecord>) -> Self {
        let now = Utc::now();
        let total_amount = records.iter().map(|r| r.amount).sum();
        Self {
            id: 0,
            sn: String::new(),
            payer_id,
            order_id,
            order_sn: order_sn.into(),
            total_amount,
            status: PaymentStatus::Unpaid,
            paid_at: None,
            pay_ddl: None,
            records,
            ctime: now,
            utime: now,
        }
    }

    pub fn record(&self, channel: ChannelType) -> Option<&PaymentRecord> {
        self.records.iter().find(|r| r.channel == channel)
    }

    pub fn record_mut(&mut self, channel: ChannelType) -> Option<&mut PaymentRecord> {
        self.records.iter_mut().find(|r| r.channel == channel)
    }

    /// 金额大于 0 的积分记录
    pub fn credit_record(&self) -> Option<&PaymentRecord> {
        self.record(ChannelType::Credit).filter(|r| r.amount > 0)
    }

    /// 微信记录（Native 或 JSAPI，一个支付单最多一条）
    pub fn wechat_record(&self) -> Option<&PaymentRecord> {
        self.records.iter().find(|r| r.channel.is_wechat())
    }

    /// 支付单及其所有记录一起迁移到新状态
    pub fn set_status(&mut self, status: PaymentStatus, now: DateTime<Utc>) {
        self.status = status;
        self.utime = now;
        let paid_at = (status == PaymentStatus::PaidSuccess).then_some(now);
        if paid_at.is_some() {
            self.paid_at = paid_at;
        }
        for record in &mut self.records {
            record.status = status;
            if paid_at.is_some() {
                record.paid_at = paid_at;
            }
        }
    }

    /// 保证支付单拥有流水号
    pub fn ensure_sn(&mut self) {
        if self.sn.is_empty() {
            self.sn = new_payment_sn();
        }
    }
}

/// 生成支付流水号，同时作为微信侧的 out_trade_no
pub fn new_payment_sn() -> String {
    format!("PAY{}", Uuid::now_v7().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixed_payment() -> Payment {
        Payment::new(
            7,
            11,
            "order-11",
            vec![
                PaymentRecord::new(ChannelType::Credit, 300),
                PaymentRecord::new(ChannelType::WechatJs, 700),
            ],
        )
    }

    #[test]
    fn test_new_payment_sums_records() {
        let payment = mixed_payment();
        assert_eq!(payment.total_amount, 1000);
        assert_eq!(payment.status, PaymentStatus::Unpaid);
        assert_eq!(payment.id, 0);
    }

    #[test]
    fn test_record_lookup() {
        let payment = mixed_payment();
        assert_eq!(payment.credit_record().map(|r| r.amount), Some(300));
        assert_eq!(
            payment.wechat_record().map(|r| r.channel),
            Some(ChannelType::WechatJs)
        );

        let zero_credit = Payment::new(
            7,
            11,
            "order-11",
            vec![PaymentRecord::new(ChannelType::Credit, 0)],
        );
        assert!(zero_credit.credit_record().is_none());
    }

    #[test]
    fn test_set_status_moves_records_together() {
        let mut payment = mixed_payment();
        let now = Utc::now();
        payment.set_status(PaymentStatus::PaidSuccess, now);

        assert_eq!(payment.paid_at, Some(now));
        assert!(payment
            .records
            .iter()
            .all(|r| r.status == PaymentStatus::PaidSuccess && r.paid_at == Some(now)));

        payment.set_status(PaymentStatus::PaidFailed, now);
        assert!(payment.records.iter().all(|r| r.status == PaymentStatus::PaidFailed));
    }

    #[test]
    fn test_ensure_sn_is_stable() {
        let mut payment = mixed_payment();
        payment.ensure_sn();
        let sn = payment.sn.clone();
        assert!(sn.starts_with("PAY"));
        payment.ensure_sn();
        assert_eq!(payment.sn, sn);
    }

    #[test]
    fn test_channel_type_codes() {
        assert_eq!(u8::from(ChannelType::WechatJs), 3);
        assert_eq!(ChannelType::try_from(1), Ok(ChannelType::Credit));
        assert!(ChannelType::try_from(9).is_err());
        assert!(ChannelType::Wechat.is_wechat());
        assert!(!ChannelType::Credit.is_wechat());
    }
}
