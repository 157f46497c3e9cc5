//! 积分预扣 saga
//!
//! 一次积分预扣只有三个状态：Reserved -> Confirmed 或 Reserved -> Cancelled。
//! 每一步外部调用都带超时和重试，确认失败时自动取消作为补偿。

use std::sync::Arc;
use std::time::Duration;

use mall_shared::error::MallError;
use mall_shared::retry::{RetryPolicy, retry_with_policy, with_timeout};
use tracing::{error, info, warn};

use crate::clients::{CreditService, DeductCreditsRequest};
use crate::error::{PaymentError, Result};
use crate::models::Payment;

/// 预扣状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationState {
    Reserved,
    Confirmed,
    Cancelled,
}

impl std::fmt::Display for ReservationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Reserved => "reserved",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// 一笔积分预扣
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditReservation {
    pub uid: i64,
    pub tid: String,
    pub amount: i64,
    state: ReservationState,
}

impl CreditReservation {
    /// 由已持久化的积分记录恢复预扣（事务 ID 存于 payment_no_3rd）
    pub fn reserved(uid: i64, tid: impl Into<String>, amount: i64) -> Self {
        Self {
            uid,
            tid: tid.into(),
            amount,
            state: ReservationState::Reserved,
        }
    }

    pub fn state(&self) -> ReservationState {
        self.state
    }

    fn invalid(&self) -> PaymentError {
        PaymentError::InvalidReservationState {
            tid: self.tid.clone(),
            state: self.state.to_string(),
        }
    }
}

/// 积分 saga 执行器
pub struct CreditSaga {
    credit: Arc<dyn CreditService>,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl CreditSaga {
    pub fn new(credit: Arc<dyn CreditService>, policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            credit,
            policy,
            call_timeout,
        }
    }

    /// 预扣积分
    ///
    /// 以支付流水号为幂等键，重试不会重复扣减。
    pub async fn reserve(&self, payment: &Payment, amount: i64) -> Result<CreditReservation> {
        let req = DeductCreditsRequest {
            uid: payment.payer_id,
            amount,
            key: payment.sn.clone(),
            biz: "payment".to_string(),
            biz_id: payment.order_id,
            desc: format!("订单 {} 积分支付", payment.order_sn),
        };

        let tid = retry_with_policy(
            &self.policy,
            "try_deduct_credits",
            MallError::is_retryable,
            || with_timeout("credit", self.call_timeout, self.credit.try_deduct_credits(&req)),
        )
        .await?;

        info!(uid = req.uid, tid = %tid, amount, "积分预扣成功");
        Ok(CreditReservation::reserved(req.uid, tid, amount))
    }

    /// 确认扣减，已确认时为空操作
    pub async fn confirm(&self, reservation: &mut CreditReservation) -> Result<()> {
        match reservation.state {
            ReservationState::Confirmed => return Ok(()),
            ReservationState::Cancelled => return Err(reservation.invalid()),
            ReservationState::Reserved => {}
        }

        let (uid, tid) = (reservation.uid, reservation.tid.as_str());
        retry_with_policy(
            &self.policy,
            "confirm_deduct_credits",
            MallError::is_retryable,
            || with_timeout("credit", self.call_timeout, self.credit.confirm_deduct_credits(uid, tid)),
        )
        .await?;

        reservation.state = ReservationState::Confirmed;
        info!(uid, tid = %reservation.tid, "积分扣减已确认");
        Ok(())
    }

    /// 取消预扣，已取消时为空操作
    pub async fn cancel(&self, reservation: &mut CreditReservation) -> Result<()> {
        match reservation.state {
            ReservationState::Cancelled => return Ok(()),
            ReservationState::Confirmed => return Err(reservation.invalid()),
            ReservationState::Reserved => {}
        }

        let (uid, tid) = (reservation.uid, reservation.tid.as_str());
        retry_with_policy(
            &self.policy,
            "cancel_deduct_credits",
            MallError::is_retryable,
            || with_timeout("credit", self.call_timeout, self.credit.cancel_deduct_credits(uid, tid)),
        )
        .await?;

        reservation.state = ReservationState::Cancelled;
        info!(uid, tid = %reservation.tid, "积分预扣已取消");
        Ok(())
    }

    /// 确认扣减；确认失败时取消预扣作为补偿
    pub async fn confirm_or_compensate(&self, reservation: &mut CreditReservation) -> Result<()> {
        match self.confirm(reservation).await {
            Ok(()) => Ok(()),
            Err(cause) => {
                warn!(tid = %reservation.tid, error = %cause, "积分确认失败，开始补偿");
                Err(self.compensate(reservation, cause).await)
            }
        }
    }

    /// 以取消预扣补偿 `cause` 代表的失败，返回组合后的错误
    pub async fn compensate(&self, reservation: &mut CreditReservation, cause: PaymentError) -> PaymentError {
        match self.cancel(reservation).await {
            Ok(()) => PaymentError::Compensated {
                cause: Box::new(cause),
            },
            Err(compensation) => {
                error!(
                    uid = reservation.uid,
                    tid = %reservation.tid,
                    error = %cause,
                    compensation_error = %compensation,
                    "积分补偿失败，需人工处理"
                );
                mall_shared::observability::metrics::record_payment_inconsistency(
                    "credit_compensation_failed",
                );
                PaymentError::CompensationFailed {
                    cause: Box::new(cause),
                    compensation: Box::new(compensation),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::MockCreditService;
    use crate::models::{ChannelType, PaymentRecord};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 1.0,
        }
    }

    fn saga(mock: MockCreditService) -> CreditSaga {
        CreditSaga::new(Arc::new(mock), fast_policy(), Duration::from_millis(200))
    }

    fn payment() -> Payment {
        let mut payment = Payment::new(7, 11, "order-11", vec![PaymentRecord::new(ChannelType::Credit, 300)]);
        payment.sn = "PAY-1".to_string();
        payment
    }

    #[tokio::test]
    async fn test_reserve_uses_payment_sn_as_key() {
        let mut mock = MockCreditService::new();
        mock.expect_try_deduct_credits()
            .withf(|req| req.key == "PAY-1" && req.uid == 7 && req.amount == 300)
            .times(1)
            .returning(|_| Ok("tid-1".to_string()));

        let reservation = saga(mock).reserve(&payment(), 300).await.unwrap();
        assert_eq!(reservation.tid, "tid-1");
        assert_eq!(reservation.state(), ReservationState::Reserved);
    }

    #[tokio::test]
    async fn test_reserve_gives_up_after_retry_budget() {
        let mut mock = MockCreditService::new();
        // 首次 + 2 次重试
        mock.expect_try_deduct_credits()
            .times(3)
            .returning(|_| Err(MallError::external("credit", "503")));

        let err = saga(mock).reserve(&payment(), 300).await.unwrap_err();
        assert!(err.is_exceeded_max_retries());
    }

    #[tokio::test]
    async fn test_confirm_is_idempotent() {
        let mut mock = MockCreditService::new();
        mock.expect_confirm_deduct_credits().times(1).returning(|_, _| Ok(()));

        let saga = saga(mock);
        let mut reservation = CreditReservation::reserved(7, "tid-1", 300);
        saga.confirm(&mut reservation).await.unwrap();
        saga.confirm(&mut reservation).await.unwrap();
        assert_eq!(reservation.state(), ReservationState::Confirmed);
    }

    #[tokio::test]
    async fn test_cancel_after_confirm_is_rejected() {
        let mut mock = MockCreditService::new();
        mock.expect_confirm_deduct_credits().times(1).returning(|_, _| Ok(()));
        mock.expect_cancel_deduct_credits().times(0);

        let saga = saga(mock);
        let mut reservation = CreditReservation::reserved(7, "tid-1", 300);
        saga.confirm(&mut reservation).await.unwrap();

        let err = saga.cancel(&mut reservation).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidReservationState { .. }));
    }

    #[tokio::test]
    async fn test_confirm_failure_cancels_reservation() {
        let mut mock = MockCreditService::new();
        mock.expect_confirm_deduct_credits()
            .times(3)
            .returning(|_, _| Err(MallError::external("credit", "503")));
        mock.expect_cancel_deduct_credits()
            .withf(|uid, tid| *uid == 7 && tid == "tid-1")
            .times(1)
            .returning(|_, _| Ok(()));

        let saga = saga(mock);
        let mut reservation = CreditReservation::reserved(7, "tid-1", 300);
        let err = saga.confirm_or_compensate(&mut reservation).await.unwrap_err();

        assert!(matches!(err, PaymentError::Compensated { .. }));
        assert!(err.is_exceeded_max_retries());
        assert_eq!(reservation.state(), ReservationState::Cancelled);
    }

    #[tokio::test]
    async fn test_compensation_failure_wraps_both_errors() {
        let mut mock = MockCreditService::new();
        mock.expect_confirm_deduct_credits()
            .returning(|_, _| Err(MallError::Validation("余额不足".to_string())));
        mock.expect_cancel_deduct_credits()
            .returning(|_, _| Err(MallError::Validation("事务不存在".to_string())));

        let saga = saga(mock);
        let mut reservation = CreditReservation::reserved(7, "tid-1", 300);
        let err = saga.confirm_or_compensate(&mut reservation).await.unwrap_err();

        assert!(matches!(err, PaymentError::CompensationFailed { .. }));
        assert_eq!(reservation.state(), ReservationState::Reserved);
    }
}
