use docflow_core::contract::{truncate_chars, ReportArtifact, StageId, StagePayload, WorkItem};
use docflow_core::coordinator::StageOutcome;
use docflow_core::error::{Capability, CapabilityError, CoordinatorError};
use docflow_core::storage_keys::report_object_key;
use tracing::info;

use super::StageContext;
use crate::adapters::inference::InferenceRequest;
use crate::adapters::object_store::REPORT_CONTENT_TYPE;

pub const DOCUMENT_EXCERPT_CHARS: usize = 1000;
const NOT_AVAILABLE: &str = "Not available";

pub fn build_report_prompt(item: &WorkItem) -> String {
    let excerpt = item
        .extraction()
        .map(|document| truncate_chars(&document.content, DOCUMENT_EXCERPT_CHARS).0)
        .unwrap_or_default();
    let analysis = item
        .analysis()
        .and_then(|analysis| serde_json::to_string_pretty(analysis).ok())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let findings = item
        .research()
        .and_then(|research| serde_json::to_string_pretty(&research.findings).ok())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    format!(
        "You are a professional research report writer.\n\
         \n\
         Create a detailed research report using the following information:\n\
         \n\
         - Original Document:\n\
         {excerpt}...\n\
         \n\
         - Document Analysis:\n\
         {analysis}\n\
         \n\
         - Research Findings:\n\
         {findings}\n\
         \n\
         Structure the report with:\n\
         1. Executive Summary\n\
         2. Key Findings\n\
         3. Detailed Analysis\n\
         4. Supporting Research\n\
         5. Conclusions and Recommendations\n\
         \n\
         Write in clear, professional English."
    )
}

pub fn run_report(
    context: &StageContext<'_>,
    document_id: &str,
) -> Result<StageOutcome, CoordinatorError> {
    let settings = &context.config.report;
    let max_stored_chars = context.config.extraction.max_content_chars;

    context
        .coordinator()
        .run_stage(StageId::Report, document_id, |item| {
            let bucket = settings.bucket.as_deref().ok_or_else(|| {
                CapabilityError::new(Capability::ObjectStore, "REPORT_BUCKET is not configured")
            })?;

            let request = InferenceRequest::new(&settings.model_id, build_report_prompt(item));
            let text = context.model.complete(&request)?;
            if text.trim().is_empty() {
                return Err(CapabilityError::new(
                    Capability::Inference,
                    "model returned an empty report",
                ));
            }

            let key = report_object_key(&settings.prefix, &item.document_id);
            context
                .objects
                .write_object(bucket, &key, text.as_bytes(), REPORT_CONTENT_TYPE)
                .map_err(|message| CapabilityError::new(Capability::ObjectStore, message))?;

            let content_length = text.chars().count();
            let (stored, text_truncated) = truncate_chars(&text, max_stored_chars);
            info!(
                document_id = %item.document_id,
                bucket,
                key = %key,
                content_length,
                "report_written"
            );
            Ok(StagePayload::Report(ReportArtifact {
                bucket: bucket.to_string(),
                key,
                model_id: settings.model_id.clone(),
                content_length,
                text: stored,
                text_truncated,
            }))
        })
}
