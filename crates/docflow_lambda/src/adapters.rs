//! Synchronous seams over the AWS SDK and HTTP clients.
//!
//! Handlers depend on the traits; the AWS implementations bridge into the
//! async SDKs from inside the Lambda runtime's multi-threaded Tokio runtime.

use std::future::Future;

pub mod inference;
pub mod invoke;
pub mod object_store;
pub mod parameters;
pub mod search;
pub mod state_store;

/// Must be called from a multi-threaded Tokio runtime.
pub(crate) fn block_on<F: Future>(future: F) -> F::Output {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
