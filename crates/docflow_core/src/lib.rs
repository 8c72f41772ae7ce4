//! Shared document-workflow domain primitives.
//!
//! This crate owns the work-item contract, the typed stage chain and the
//! coordinator that moves one document through it. It excludes AWS SDK and
//! Lambda runtime concerns; those live in `docflow_lambda`.

pub mod chain;
pub mod contract;
pub mod coordinator;
pub mod error;
pub mod storage_keys;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
pub mod trigger;
