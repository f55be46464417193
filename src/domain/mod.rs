//! Domain model of the approval workflow: money values, chain templates, the
//! approval policy, the assignment balancer, persisted steps and the ports the
//! application layer talks to.

pub mod balancer;
pub mod loan;
pub mod money;
pub mod policy;
pub mod ports;
pub mod step;
pub mod template;

pub type LoanId = u64;
pub type StepId = u64;
pub type ApproverId = u64;
pub type RoleId = u64;
pub type ProductId = u64;
pub type AccountId = u64;
pub type ChargeId = u64;
pub type TransactionId = u64;
pub type PaymentTypeId = u64;
