use docflow_core::contract::{document_id_for, SourceLocation, StageId, StagePayload};
use docflow_core::coordinator::StageOutcome;
use docflow_core::error::{Capability, CapabilityError, CoordinatorError};
use tracing::{info, warn};

use super::{DocumentFailure, SkippedObject, StageContext, StageSummary};
use crate::extraction::extract_document;

/// Registers each supported upload and runs extraction on it.
///
/// Non-retryable failures are collected per document; the first retryable one
/// stops the batch so the whole event is redelivered.
pub fn ingest_sources(
    context: &StageContext<'_>,
    sources: Vec<SourceLocation>,
) -> Result<StageSummary, CoordinatorError> {
    let coordinator = context.coordinator();
    let mut summary = StageSummary::new(StageId::Extraction);

    for source in sources {
        if !source.is_supported() {
            let extension = source.extension();
            warn!(uri = %source.uri(), extension = %extension, "unsupported_object_skipped");
            summary.skipped.push(SkippedObject {
                reason: format!("unsupported file type '{extension}'"),
                source,
            });
            continue;
        }

        let document_id = document_id_for(&source);
        info!(document_id = %document_id, uri = %source.uri(), "object_received");

        let result = coordinator
            .create(&document_id, source)
            .and_then(|_| run_extraction(context, &document_id));
        match result {
            Ok(outcome) => summary.outcomes.push(outcome),
            Err(error) if error.is_retryable() => return Err(error),
            Err(error) => summary.failures.push(DocumentFailure { document_id, error }),
        }
    }

    Ok(summary)
}

pub fn run_extraction(
    context: &StageContext<'_>,
    document_id: &str,
) -> Result<StageOutcome, CoordinatorError> {
    let max_content_chars = context.config.extraction.max_content_chars;

    context
        .coordinator()
        .run_stage(StageId::Extraction, document_id, |item| {
            let source = &item.source_location;
            let bytes = context
                .objects
                .read_object(&source.bucket, &source.key)
                .map_err(|message| CapabilityError::new(Capability::ObjectStore, message))?;
            let document = extract_document(source, &bytes, max_content_chars)?;

            info!(
                document_id = %item.document_id,
                method = %document.extraction_method,
                content_length = document.full_content_length,
                truncated = document.content_truncated,
                warnings = document.warnings.len(),
                "document_extracted"
            );
            Ok(StagePayload::Extraction(document))
        })
}
