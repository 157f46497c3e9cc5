//! 仓储层

mod payment_repo;
mod traits;

pub use payment_repo::PaymentRepository;
pub use traits::PaymentRepositoryTrait;

#[cfg(test)]
pub use traits::MockPaymentRepositoryTrait;

#[cfg(test)]
pub(crate) mod memory;
