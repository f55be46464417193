//! Application layer orchestrating the approval workflow.
//!
//! `WorkflowEngine` is the only writer of approval steps. It serializes work
//! per loan, calls into the ledger through the domain ports and commits step
//! changes as one batch per operation. `ChainScheduler` is the periodic
//! trigger that builds chains for newly eligible loans.

pub mod commands;
pub mod engine;
mod integration;
pub mod locks;
pub mod scheduler;
pub mod settings;
pub mod settlement;
