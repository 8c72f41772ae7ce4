//! Stage handlers and the mapping from coordinator results to responses.
//!
//! Every stage function receives the same event shapes. Non-retryable
//! failures become API Gateway style responses; retryable ones are returned
//! as errors so the invoking platform redelivers the event.

use docflow_core::contract::{SourceLocation, StageId};
use docflow_core::coordinator::{Coordinator, StageInvoker, StageOutcome, StateStore};
use docflow_core::error::{CoordinatorError, ValidationError};
use docflow_core::trigger::{parse_trigger_event, TriggerEvent};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::adapters::inference::InferenceModel;
use crate::adapters::object_store::ObjectStore;
use crate::adapters::search::WebSearch;
use crate::config::RuntimeConfig;

pub mod analysis;
pub mod extraction;
pub mod report;
pub mod research;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiGatewayResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub headers: Value,
    pub body: String,
}

impl ApiGatewayResponse {
    pub fn body_json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

/// Everything a stage invocation touches, borrowed for one event.
pub struct StageContext<'a> {
    pub config: &'a RuntimeConfig,
    pub store: &'a dyn StateStore,
    pub invoker: &'a dyn StageInvoker,
    pub objects: &'a dyn ObjectStore,
    pub model: &'a dyn InferenceModel,
    pub search: &'a dyn WebSearch,
}

impl<'a> StageContext<'a> {
    pub fn coordinator(&self) -> Coordinator<'a> {
        Coordinator::new(&self.config.coordinator, self.store, self.invoker)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedObject {
    pub source: SourceLocation,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFailure {
    pub document_id: String,
    pub error: CoordinatorError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSummary {
    pub stage: StageId,
    pub outcomes: Vec<StageOutcome>,
    pub skipped: Vec<SkippedObject>,
    pub failures: Vec<DocumentFailure>,
}

impl StageSummary {
    pub fn new(stage: StageId) -> Self {
        Self {
            stage,
            outcomes: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn single(stage: StageId, outcome: StageOutcome) -> Self {
        let mut summary = Self::new(stage);
        summary.outcomes.push(outcome);
        summary
    }
}

/// Handles one event for the configured stage.
///
/// `Err` is reserved for retryable failures.
pub fn handle_stage_event(
    event: Value,
    context: &StageContext<'_>,
) -> Result<ApiGatewayResponse, CoordinatorError> {
    let stage = context.config.stage;
    let trigger = match parse_trigger_event(event) {
        Ok(trigger) => trigger,
        Err(error) => return Ok(error_response(stage, None, &CoordinatorError::from(error))),
    };

    let result = match (stage, trigger) {
        (StageId::Extraction, TriggerEvent::ObjectCreated(sources)) => {
            extraction::ingest_sources(context, sources)
        }
        (_, TriggerEvent::ObjectCreated(_)) => {
            let error = CoordinatorError::from(ValidationError::new(format!(
                "stage '{stage}' only accepts handoff events"
            )));
            return Ok(error_response(stage, None, &error));
        }
        (_, TriggerEvent::Handoff(handoff)) => {
            let document_id = handoff.document_id;
            let outcome = match stage {
                StageId::Extraction => extraction::run_extraction(context, &document_id),
                StageId::Analysis => analysis::run_analysis(context, &document_id),
                StageId::Research => research::run_research(context, &document_id),
                StageId::Report => report::run_report(context, &document_id),
            };
            match outcome {
                Ok(outcome) => Ok(StageSummary::single(stage, outcome)),
                Err(error) => {
                    let mut summary = StageSummary::new(stage);
                    summary.failures.push(DocumentFailure { document_id, error });
                    Ok(summary)
                }
            }
        }
    };

    summarize(result?)
}

fn summarize(summary: StageSummary) -> Result<ApiGatewayResponse, CoordinatorError> {
    if let Some(failure) = summary
        .failures
        .iter()
        .find(|failure| failure.error.is_retryable())
    {
        warn!(
            stage = %summary.stage,
            document_id = %failure.document_id,
            error = %failure.error,
            "stage_retry_requested"
        );
        return Err(failure.error.clone());
    }

    if let Some(failure) = summary.failures.first() {
        return Ok(error_response(
            summary.stage,
            Some(&failure.document_id),
            &failure.error,
        ));
    }

    for outcome in &summary.outcomes {
        info!(
            stage = %summary.stage,
            document_id = %outcome.document_id(),
            outcome = outcome.label(),
            "stage_finished"
        );
    }

    let results: Vec<Value> = summary.outcomes.iter().map(outcome_json).collect();
    let skipped: Vec<Value> = summary
        .skipped
        .iter()
        .map(|skipped| {
            json!({
                "bucket": skipped.source.bucket,
                "key": skipped.source.key,
                "reason": skipped.reason,
            })
        })
        .collect();

    Ok(json_response(
        200,
        json!({
            "stage": summary.stage,
            "results": results,
            "skipped": skipped,
        }),
    ))
}

fn outcome_json(outcome: &StageOutcome) -> Value {
    match outcome {
        StageOutcome::HandedOff {
            document_id,
            next,
            function_name,
        } => json!({
            "document_id": document_id,
            "outcome": outcome.label(),
            "next_stage": next,
            "function_name": function_name,
        }),
        StageOutcome::Completed { document_id } => json!({
            "document_id": document_id,
            "outcome": outcome.label(),
        }),
        StageOutcome::Duplicate {
            document_id,
            redispatched,
            ..
        } => json!({
            "document_id": document_id,
            "outcome": outcome.label(),
            "redispatched": redispatched,
        }),
    }
}

/// Status code for a non-retryable failure.
pub fn status_code_for(error: &CoordinatorError) -> u16 {
    match error {
        CoordinatorError::Validation(_) => 400,
        CoordinatorError::NotFound { .. } => 404,
        CoordinatorError::Conflict { .. }
        | CoordinatorError::StaleWrite { .. }
        | CoordinatorError::OutOfOrder { .. }
        | CoordinatorError::Terminal { .. } => 409,
        CoordinatorError::CapabilityError { .. }
        | CoordinatorError::CorruptState { .. }
        | CoordinatorError::StorageUnavailable(_)
        | CoordinatorError::DispatchError { .. } => 500,
    }
}

fn error_response(
    stage: StageId,
    document_id: Option<&str>,
    error: &CoordinatorError,
) -> ApiGatewayResponse {
    warn!(
        stage = %stage,
        document_id = document_id.unwrap_or_default(),
        code = error.code(),
        error = %error,
        "stage_rejected"
    );
    json_response(
        status_code_for(error),
        json!({
            "stage": stage,
            "document_id": document_id,
            "error": error.code(),
            "message": error.to_string(),
        }),
    )
}

fn json_response(status_code: u16, payload: Value) -> ApiGatewayResponse {
    ApiGatewayResponse {
        status_code,
        headers: json!({"Content-Type": "application/json"}),
        body: payload.to_string(),
    }
}
