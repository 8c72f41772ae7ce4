//! Moves one work item through the configured stage chain.
//!
//! Every stage invocation follows the same shape: load the record, check that
//! the stage owns it, run the delegated work, append the result, persist with
//! a conditional write, and only then hand off to the next stage. Handoffs are
//! at-least-once: a duplicate invocation of a finished stage is a no-op that
//! re-submits a handoff which may have been lost after the write.

use chrono::{SecondsFormat, Utc};
use tracing::{error, info, warn};

use crate::chain::{StageChain, StageRoutes};
use crate::contract::{
    HandoffPayload, SourceLocation, StageFailure, StageId, StagePayload, WorkItem, WorkStatus,
};
use crate::error::{CapabilityError, CoordinatorError, StoreError, ValidationError};

pub const DEFAULT_TABLE_NAME: &str = "agent-workflow-state";
pub const DEFAULT_TIMEOUT_SECONDS: u32 = 300;
pub const DEFAULT_MEMORY_MB: u32 = 1024;

/// Record store keyed by `document_id`.
pub trait StateStore {
    fn get(&self, document_id: &str) -> Result<Option<WorkItem>, StoreError>;

    /// Writes `item` only if the stored record is at `expected_version`
    /// (`0` meaning no record exists yet).
    fn put(&self, item: &WorkItem, expected_version: u64) -> Result<(), StoreError>;
}

/// Submits a named unit of work without waiting for it to run.
pub trait StageInvoker {
    fn invoke_stage(&self, function_name: &str, payload: &[u8]) -> Result<(), String>;
}

/// Ceilings handed to the invocation platform; not interpreted here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationLimits {
    pub timeout_seconds: u32,
    pub memory_mb: u32,
}

impl Default for InvocationLimits {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            memory_mb: DEFAULT_MEMORY_MB,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub table_name: String,
    pub chain: StageChain,
    pub routes: StageRoutes,
    pub limits: InvocationLimits,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            chain: StageChain::default(),
            routes: StageRoutes::default(),
            limits: InvocationLimits::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    HandedOff {
        document_id: String,
        next: StageId,
        function_name: String,
    },
    Completed {
        document_id: String,
    },
    /// The stage had already recorded its result; nothing was rewritten.
    Duplicate {
        document_id: String,
        stage: StageId,
        redispatched: Option<StageId>,
    },
}

impl StageOutcome {
    pub fn document_id(&self) -> &str {
        match self {
            Self::HandedOff { document_id, .. }
            | Self::Completed { document_id }
            | Self::Duplicate { document_id, .. } => document_id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::HandedOff { .. } => "handed_off",
            Self::Completed { .. } => "completed",
            Self::Duplicate { .. } => "duplicate_ignored",
        }
    }
}

pub struct Coordinator<'a> {
    config: &'a CoordinatorConfig,
    store: &'a dyn StateStore,
    invoker: &'a dyn StageInvoker,
    clock: fn() -> String,
}

impl<'a> Coordinator<'a> {
    pub fn new(
        config: &'a CoordinatorConfig,
        store: &'a dyn StateStore,
        invoker: &'a dyn StageInvoker,
    ) -> Self {
        Self {
            config,
            store,
            invoker,
            clock: rfc3339_now,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> String) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        self.config
    }

    /// Creates the record for a newly ingested document, or returns the
    /// existing one when the ingestion event is redelivered.
    pub fn create(
        &self,
        document_id: &str,
        source: SourceLocation,
    ) -> Result<WorkItem, CoordinatorError> {
        if let Some(existing) = self.store.get(document_id)? {
            return Ok(existing);
        }

        let item = WorkItem::new(
            document_id,
            source,
            self.config.chain.initial(),
            &(self.clock)(),
        );
        match self.persist(item) {
            Ok(item) => {
                info!(document_id, "work_item_created");
                Ok(item)
            }
            Err(CoordinatorError::StaleWrite { .. }) => self.load(document_id),
            Err(error) => Err(error),
        }
    }

    pub fn load(&self, document_id: &str) -> Result<WorkItem, CoordinatorError> {
        self.store
            .get(document_id)?
            .ok_or_else(|| CoordinatorError::NotFound {
                document_id: document_id.to_string(),
            })
    }

    pub fn begin_stage(
        &self,
        item: &WorkItem,
        stage: StageId,
    ) -> Result<WorkItem, CoordinatorError> {
        self.ensure_configured(stage)?;

        if item.has_result(stage) {
            return Err(CoordinatorError::Conflict {
                document_id: item.document_id.clone(),
                stage,
            });
        }

        if item.status.is_terminal() {
            return Err(CoordinatorError::Terminal {
                document_id: item.document_id.clone(),
                status: item.status,
            });
        }

        if item.owner != Some(stage) {
            return Err(CoordinatorError::OutOfOrder {
                document_id: item.document_id.clone(),
                stage,
                owner: item.owner,
            });
        }

        let mut started = item.clone();
        started.status = WorkStatus::InProgress;
        Ok(started)
    }

    /// Appends `payload` under `stage` and moves ownership to the successor.
    /// The input item is never modified.
    pub fn apply_stage_result(
        &self,
        item: &WorkItem,
        stage: StageId,
        payload: StagePayload,
    ) -> Result<WorkItem, CoordinatorError> {
        self.ensure_configured(stage)?;

        if payload.stage() != stage {
            return Err(ValidationError::new(format!(
                "payload for stage '{}' cannot be recorded under '{stage}'",
                payload.stage()
            ))
            .into());
        }

        if item.has_result(stage) {
            return Err(CoordinatorError::Conflict {
                document_id: item.document_id.clone(),
                stage,
            });
        }

        if item.status.is_terminal() {
            return Err(CoordinatorError::Terminal {
                document_id: item.document_id.clone(),
                status: item.status,
            });
        }

        let next_stage = self.config.chain.next_after(stage);
        let mut updated = item.clone();
        updated.stage_results.insert(stage, payload);
        updated.status = WorkStatus::InProgress;
        updated.next_stage = next_stage;
        updated.owner = next_stage;
        Ok(updated)
    }

    /// Conditionally writes the item and returns it at its new version.
    pub fn persist(&self, mut item: WorkItem) -> Result<WorkItem, CoordinatorError> {
        let expected_version = item.version;
        item.version += 1;
        item.updated_at = (self.clock)();
        self.store.put(&item, expected_version)?;
        Ok(item)
    }

    /// Hands off to `next_stage`, or marks the item completed when there is none.
    pub fn advance(&self, item: WorkItem) -> Result<StageOutcome, CoordinatorError> {
        if item.status.is_terminal() {
            return Err(CoordinatorError::Terminal {
                document_id: item.document_id,
                status: item.status,
            });
        }

        if item.stage_results.is_empty() {
            return Err(ValidationError::new(format!(
                "work item '{}' cannot advance before any stage has run",
                item.document_id
            ))
            .into());
        }

        match item.next_stage {
            Some(next) => {
                let function_name = self.dispatch(&item, next)?;
                Ok(StageOutcome::HandedOff {
                    document_id: item.document_id,
                    next,
                    function_name,
                })
            }
            None => {
                let mut completed = item;
                completed.status = WorkStatus::Completed;
                completed.owner = None;
                let completed = self.persist(completed)?;
                info!(
                    document_id = %completed.document_id,
                    stages = completed.stage_results.len(),
                    "work_item_completed"
                );
                Ok(StageOutcome::Completed {
                    document_id: completed.document_id,
                })
            }
        }
    }

    /// Marks the item failed at `stage`; no later stage will run.
    pub fn fail(
        &self,
        item: WorkItem,
        stage: StageId,
        message: &str,
    ) -> Result<WorkItem, CoordinatorError> {
        let now = (self.clock)();
        let mut failed = item;
        failed.status = WorkStatus::Failed;
        failed.owner = None;
        failed.next_stage = None;
        failed.failure = Some(StageFailure {
            stage,
            message: message.to_string(),
            failed_at: now,
        });
        let failed = self.persist(failed)?;
        error!(
            document_id = %failed.document_id,
            stage = %stage,
            error = message,
            "work_item_failed"
        );
        Ok(failed)
    }

    /// Re-submits a pending handoff if the next stage has not picked it up yet.
    pub fn retry_handoff(&self, item: &WorkItem) -> Result<Option<StageId>, CoordinatorError> {
        if item.status != WorkStatus::InProgress {
            return Ok(None);
        }
        let Some(next) = item.next_stage else {
            return Ok(None);
        };
        if item.has_result(next) || item.owner != Some(next) {
            return Ok(None);
        }

        self.dispatch(item, next)?;
        Ok(Some(next))
    }

    /// Runs one stage invocation end to end.
    pub fn run_stage<F>(
        &self,
        stage: StageId,
        document_id: &str,
        work: F,
    ) -> Result<StageOutcome, CoordinatorError>
    where
        F: FnOnce(&WorkItem) -> Result<StagePayload, CapabilityError>,
    {
        let loaded = self.load(document_id)?;
        let item = match self.begin_stage(&loaded, stage) {
            Ok(item) => item,
            Err(CoordinatorError::Conflict { .. }) => return self.duplicate(&loaded, stage),
            Err(error) => return Err(error),
        };

        info!(document_id, stage = %stage, "stage_started");

        let payload = match work(&item) {
            Ok(payload) => payload,
            Err(source) => {
                self.fail(item, stage, &source.to_string())?;
                return Err(CoordinatorError::CapabilityError {
                    document_id: document_id.to_string(),
                    stage,
                    source,
                });
            }
        };

        let item = self.apply_stage_result(&item, stage, payload)?;
        let item = match self.persist(item) {
            Ok(item) => item,
            Err(CoordinatorError::StaleWrite { .. }) => {
                warn!(document_id, stage = %stage, "stage_result_lost_to_concurrent_write");
                let current = self.load(document_id)?;
                return self.duplicate(&current, stage);
            }
            Err(error) => return Err(error),
        };

        info!(document_id, stage = %stage, version = item.version, "stage_result_persisted");
        self.advance(item)
    }

    fn duplicate(&self, item: &WorkItem, stage: StageId) -> Result<StageOutcome, CoordinatorError> {
        if self.completion_pending(item, stage) {
            warn!(
                document_id = %item.document_id,
                stage = %stage,
                "resuming_interrupted_completion"
            );
            return match self.advance(item.clone()) {
                Err(CoordinatorError::StaleWrite { .. }) => Ok(StageOutcome::Duplicate {
                    document_id: item.document_id.clone(),
                    stage,
                    redispatched: None,
                }),
                outcome => outcome,
            };
        }

        // Only the stage whose handoff is pending may re-submit it.
        let redispatched = if item.has_result(stage)
            && self.config.chain.next_after(stage) == item.next_stage
        {
            self.retry_handoff(item)?
        } else {
            None
        };

        info!(
            document_id = %item.document_id,
            stage = %stage,
            redispatched = ?redispatched,
            "duplicate_invocation_ignored"
        );
        Ok(StageOutcome::Duplicate {
            document_id: item.document_id.clone(),
            stage,
            redispatched,
        })
    }

    /// The last stage's result is stored but the completion write never landed.
    fn completion_pending(&self, item: &WorkItem, stage: StageId) -> bool {
        item.status == WorkStatus::InProgress
            && item.has_result(stage)
            && item.next_stage.is_none()
            && self.config.chain.next_after(stage).is_none()
    }

    fn dispatch(&self, item: &WorkItem, next: StageId) -> Result<String, CoordinatorError> {
        let function_name = self.config.routes.function_name(next).to_string();
        let dispatch_error = |message: String| CoordinatorError::DispatchError {
            document_id: item.document_id.clone(),
            stage: next,
            message,
        };

        let payload = serde_json::to_vec(&HandoffPayload {
            document_id: item.document_id.clone(),
        })
        .map_err(|error| dispatch_error(format!("failed to encode handoff: {error}")))?;

        if let Err(message) = self.invoker.invoke_stage(&function_name, &payload) {
            warn!(
                document_id = %item.document_id,
                next = %next,
                function_name = %function_name,
                error = %message,
                "handoff_failed"
            );
            return Err(dispatch_error(message));
        }

        info!(
            document_id = %item.document_id,
            next = %next,
            function_name = %function_name,
            "handoff_dispatched"
        );
        Ok(function_name)
    }

    fn ensure_configured(&self, stage: StageId) -> Result<(), CoordinatorError> {
        if self.config.chain.contains(stage) {
            Ok(())
        } else {
            Err(ValidationError::new(format!(
                "stage '{stage}' is not part of the configured chain"
            ))
            .into())
        }
    }
}

fn rfc3339_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::contract::{ContentMetadata, DocumentAnalysis, ExtractedDocument};
    use crate::test_helpers::{InMemoryStateStore, RecordingInvoker};

    fn fixed_clock() -> String {
        "2026-10-18T12:00:00Z".to_string()
    }

    fn extraction_payload() -> StagePayload {
        StagePayload::Extraction(ExtractedDocument {
            filename: "notes.txt".to_string(),
            file_extension: ".txt".to_string(),
            file_size: 11,
            extraction_method: "text_decode_utf-8".to_string(),
            content: "hello world".to_string(),
            content_truncated: false,
            full_content_length: 11,
            full_content_location: None,
            warnings: Vec::new(),
            metadata: ContentMetadata::from_text("hello world"),
        })
    }

    fn analysis_payload() -> StagePayload {
        StagePayload::Analysis(DocumentAnalysis {
            topics: vec!["greetings".to_string()],
            entities: Value::Null,
            themes: Vec::new(),
            research_questions: vec!["why hello?".to_string()],
            model_id: "model".to_string(),
        })
    }

    fn created_item(coordinator: &Coordinator<'_>) -> WorkItem {
        coordinator
            .create("notes_0123456789ab", SourceLocation::new("uploads", "notes.txt"))
            .expect("item should be created")
    }

    #[test]
    fn create_is_idempotent_for_redelivered_ingestion() {
        let config = CoordinatorConfig::default();
        let store = InMemoryStateStore::new();
        let invoker = RecordingInvoker::new();
        let coordinator = Coordinator::new(&config, &store, &invoker).with_clock(fixed_clock);

        let first = created_item(&coordinator);
        let second = created_item(&coordinator);

        assert_eq!(first, second);
        assert_eq!(first.version, 1);
        assert_eq!(first.status, WorkStatus::Pending);
        assert_eq!(first.owner, Some(StageId::Extraction));
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn load_missing_item_is_not_found() {
        let config = CoordinatorConfig::default();
        let store = InMemoryStateStore::new();
        let invoker = RecordingInvoker::new();
        let coordinator = Coordinator::new(&config, &store, &invoker);

        let error = coordinator.load("missing").expect_err("load should fail");
        assert_eq!(
            error,
            CoordinatorError::NotFound {
                document_id: "missing".to_string()
            }
        );
    }

    #[test]
    fn second_result_for_the_same_stage_conflicts_and_leaves_state_unchanged() {
        let config = CoordinatorConfig::default();
        let store = InMemoryStateStore::new();
        let invoker = RecordingInvoker::new();
        let coordinator = Coordinator::new(&config, &store, &invoker);
        let item = created_item(&coordinator);

        let applied = coordinator
            .apply_stage_result(&item, StageId::Extraction, extraction_payload())
            .expect("first result should apply");
        let error = coordinator
            .apply_stage_result(&applied, StageId::Extraction, extraction_payload())
            .expect_err("second result should conflict");

        assert!(matches!(
            error,
            CoordinatorError::Conflict {
                stage: StageId::Extraction,
                ..
            }
        ));
        assert_eq!(applied.stage_results.len(), 1);
        assert_eq!(applied.next_stage, Some(StageId::Analysis));
        assert_eq!(applied.owner, Some(StageId::Analysis));
        assert!(item.stage_results.is_empty());
    }

    #[test]
    fn payload_must_match_stage() {
        let config = CoordinatorConfig::default();
        let store = InMemoryStateStore::new();
        let invoker = RecordingInvoker::new();
        let coordinator = Coordinator::new(&config, &store, &invoker);
        let item = created_item(&coordinator);

        let error = coordinator
            .apply_stage_result(&item, StageId::Extraction, analysis_payload())
            .expect_err("mismatched payload should fail");
        assert_eq!(error.code(), "validation_error");
    }

    #[test]
    fn advance_dispatches_exactly_once_with_document_id() {
        let config = CoordinatorConfig::default();
        let store = InMemoryStateStore::new();
        let invoker = RecordingInvoker::new();
        let coordinator = Coordinator::new(&config, &store, &invoker);
        let item = created_item(&coordinator);

        let item = coordinator
            .apply_stage_result(&item, StageId::Extraction, extraction_payload())
            .expect("extraction applies");
        let item = coordinator
            .apply_stage_result(&item, StageId::Analysis, analysis_payload())
            .expect("analysis applies");
        assert_eq!(item.next_stage, Some(StageId::Research));
        let item = coordinator.persist(item).expect("persist should pass");

        let outcome = coordinator.advance(item).expect("advance should pass");

        assert_eq!(
            outcome,
            StageOutcome::HandedOff {
                document_id: "notes_0123456789ab".to_string(),
                next: StageId::Research,
                function_name: "research-agent".to_string(),
            }
        );
        let invocations = invoker.invocations();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].function_name, "research-agent");
        let handoff: Value =
            serde_json::from_slice(&invocations[0].payload).expect("handoff should be json");
        assert_eq!(handoff, serde_json::json!({"document_id": "notes_0123456789ab"}));
    }

    #[test]
    fn advance_without_next_stage_completes_without_dispatch() {
        let config = CoordinatorConfig {
            chain: StageChain::parse("extraction").expect("chain"),
            ..CoordinatorConfig::default()
        };
        let store = InMemoryStateStore::new();
        let invoker = RecordingInvoker::new();
        let coordinator = Coordinator::new(&config, &store, &invoker);
        let item = created_item(&coordinator);

        let item = coordinator
            .apply_stage_result(&item, StageId::Extraction, extraction_payload())
            .expect("extraction applies");
        assert_eq!(item.next_stage, None);
        let item = coordinator.persist(item).expect("persist");

        let outcome = coordinator.advance(item).expect("advance");

        assert!(matches!(outcome, StageOutcome::Completed { .. }));
        assert!(invoker.invocations().is_empty());
        let stored = store.item("notes_0123456789ab").expect("stored item");
        assert_eq!(stored.status, WorkStatus::Completed);
        assert_eq!(stored.owner, None);
    }

    #[test]
    fn redelivery_finishes_completion_lost_to_storage_outage() {
        let config = CoordinatorConfig {
            chain: StageChain::parse("extraction").expect("chain"),
            ..CoordinatorConfig::default()
        };
        let store = InMemoryStateStore::new();
        let invoker = RecordingInvoker::new();
        let coordinator = Coordinator::new(&config, &store, &invoker);
        created_item(&coordinator);

        store.fail_write_attempt(3, "blip");
        let error = coordinator
            .run_stage(StageId::Extraction, "notes_0123456789ab", |_| {
                Ok(extraction_payload())
            })
            .expect_err("completion write fails");
        assert_eq!(error, CoordinatorError::StorageUnavailable("blip".to_string()));
        assert!(error.is_retryable());

        let outcome = coordinator
            .run_stage(StageId::Extraction, "notes_0123456789ab", |_| {
                Ok(extraction_payload())
            })
            .expect("redelivery should complete");

        assert_eq!(
            outcome,
            StageOutcome::Completed {
                document_id: "notes_0123456789ab".to_string()
            }
        );
        let stored = store.item("notes_0123456789ab").expect("stored item");
        assert_eq!(stored.status, WorkStatus::Completed);
        assert_eq!(stored.owner, None);
        assert!(invoker.invocations().is_empty());
    }

    #[test]
    fn persist_surfaces_storage_outage() {
        let config = CoordinatorConfig::default();
        let store = InMemoryStateStore::new();
        let invoker = RecordingInvoker::new();
        let coordinator = Coordinator::new(&config, &store, &invoker);
        let item = created_item(&coordinator);

        store.fail_writes("throttled");
        let error = coordinator.persist(item).expect_err("persist should fail");

        assert!(matches!(error, CoordinatorError::StorageUnavailable(_)));
        assert!(error.is_retryable());
    }

    #[test]
    fn stage_that_does_not_own_the_item_is_rejected() {
        let config = CoordinatorConfig::default();
        let store = InMemoryStateStore::new();
        let invoker = RecordingInvoker::new();
        let coordinator = Coordinator::new(&config, &store, &invoker);
        let item = created_item(&coordinator);

        let error = coordinator
            .begin_stage(&item, StageId::Research)
            .expect_err("research cannot start first");
        assert_eq!(
            error,
            CoordinatorError::OutOfOrder {
                document_id: item.document_id.clone(),
                stage: StageId::Research,
                owner: Some(StageId::Extraction),
            }
        );
    }

    #[test]
    fn unconfigured_stage_is_rejected() {
        let config = CoordinatorConfig {
            chain: StageChain::parse("extraction,analysis,report").expect("chain"),
            ..CoordinatorConfig::default()
        };
        let store = InMemoryStateStore::new();
        let invoker = RecordingInvoker::new();
        let coordinator = Coordinator::new(&config, &store, &invoker);
        let item = created_item(&coordinator);

        let error = coordinator
            .begin_stage(&item, StageId::Research)
            .expect_err("research is not configured");
        assert_eq!(error.code(), "validation_error");
    }

    #[test]
    fn capability_failure_marks_item_failed_and_halts_chain() {
        let config = CoordinatorConfig::default();
        let store = InMemoryStateStore::new();
        let invoker = RecordingInvoker::new();
        let coordinator = Coordinator::new(&config, &store, &invoker).with_clock(fixed_clock);
        created_item(&coordinator);

        let error = coordinator
            .run_stage(StageId::Extraction, "notes_0123456789ab", |_| {
                Err(CapabilityError::new(
                    crate::error::Capability::Extraction,
                    "unreadable",
                ))
            })
            .expect_err("stage should fail");

        assert_eq!(error.code(), "capability_error");
        assert!(invoker.invocations().is_empty());
        let stored = store.item("notes_0123456789ab").expect("stored item");
        assert_eq!(stored.status, WorkStatus::Failed);
        assert_eq!(stored.owner, None);
        let failure = stored.failure.expect("failure recorded");
        assert_eq!(failure.stage, StageId::Extraction);
        assert_eq!(failure.message, "extraction failed: unreadable");
        assert_eq!(failure.failed_at, "2026-10-18T12:00:00Z");

        let error = coordinator
            .run_stage(StageId::Extraction, "notes_0123456789ab", |_| {
                Ok(extraction_payload())
            })
            .expect_err("failed items stay failed");
        assert!(matches!(
            error,
            CoordinatorError::Terminal {
                status: WorkStatus::Failed,
                ..
            }
        ));
    }

    #[test]
    fn failed_dispatch_keeps_result_and_redelivery_retries_only_the_handoff() {
        let config = CoordinatorConfig::default();
        let store = InMemoryStateStore::new();
        let invoker = RecordingInvoker::new();
        let coordinator = Coordinator::new(&config, &store, &invoker);
        created_item(&coordinator);

        invoker.fail_next("rate exceeded");
        let error = coordinator
            .run_stage(StageId::Extraction, "notes_0123456789ab", |_| {
                Ok(extraction_payload())
            })
            .expect_err("dispatch should fail");
        assert!(error.is_retryable());

        let stored = store.item("notes_0123456789ab").expect("stored item");
        assert!(stored.has_result(StageId::Extraction));
        assert_eq!(stored.owner, Some(StageId::Analysis));

        let mut reran = false;
        let outcome = coordinator
            .run_stage(StageId::Extraction, "notes_0123456789ab", |_| {
                reran = true;
                Ok(extraction_payload())
            })
            .expect("redelivery should succeed");

        assert!(!reran);
        assert_eq!(
            outcome,
            StageOutcome::Duplicate {
                document_id: "notes_0123456789ab".to_string(),
                stage: StageId::Extraction,
                redispatched: Some(StageId::Analysis),
            }
        );
        assert_eq!(invoker.function_names(), vec!["analysis-agent".to_string()]);
    }

    #[test]
    fn duplicate_after_next_stage_finished_does_not_redispatch() {
        let config = CoordinatorConfig::default();
        let store = InMemoryStateStore::new();
        let invoker = RecordingInvoker::new();
        let coordinator = Coordinator::new(&config, &store, &invoker);
        created_item(&coordinator);

        coordinator
            .run_stage(StageId::Extraction, "notes_0123456789ab", |_| {
                Ok(extraction_payload())
            })
            .expect("extraction");
        coordinator
            .run_stage(StageId::Analysis, "notes_0123456789ab", |_| Ok(analysis_payload()))
            .expect("analysis");

        let outcome = coordinator
            .run_stage(StageId::Extraction, "notes_0123456789ab", |_| {
                Ok(extraction_payload())
            })
            .expect("duplicate extraction");

        assert!(matches!(
            outcome,
            StageOutcome::Duplicate {
                redispatched: None,
                ..
            }
        ));
        assert_eq!(
            invoker.function_names(),
            vec!["analysis-agent".to_string(), "research-agent".to_string()]
        );
    }

    #[test]
    fn lost_conditional_write_is_reported_as_duplicate() {
        let config = CoordinatorConfig::default();
        let store = InMemoryStateStore::new();
        let invoker = RecordingInvoker::new();
        let coordinator = Coordinator::new(&config, &store, &invoker);
        created_item(&coordinator);

        let outcome = coordinator
            .run_stage(StageId::Extraction, "notes_0123456789ab", |item| {
                // A concurrent invocation of the same stage wins the write.
                let winner = coordinator
                    .apply_stage_result(item, StageId::Extraction, extraction_payload())
                    .expect("winner applies");
                coordinator.persist(winner).expect("winner persists");
                Ok(extraction_payload())
            })
            .expect("loser should not fail");

        assert!(matches!(
            outcome,
            StageOutcome::Duplicate {
                stage: StageId::Extraction,
                redispatched: Some(StageId::Analysis),
                ..
            }
        ));
        let stored = store.item("notes_0123456789ab").expect("stored item");
        assert_eq!(stored.version, 2);
    }
}
