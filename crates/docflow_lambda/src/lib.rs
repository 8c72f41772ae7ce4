//! AWS-oriented adapters and handlers for the document workflow stages.
//!
//! This crate owns runtime integration details (Lambda handlers, stage
//! dispatch, DynamoDB/S3/Bedrock/Tavily adapters and environment
//! configuration). Workflow rules live in `docflow_core`.

pub mod adapters;
pub mod config;
pub mod extraction;
pub mod handlers;
