use docflow_core::contract::{DocumentAnalysis, StageId, StagePayload, MAX_TOPICS};
use docflow_core::coordinator::StageOutcome;
use docflow_core::error::{Capability, CapabilityError, CoordinatorError};
use serde_json::Value;
use tracing::info;

use super::StageContext;
use crate::adapters::inference::{extract_json_object, InferenceRequest};

pub fn build_analysis_prompt(content: &str) -> String {
    format!(
        "Analyze the following document and extract:\n\
         1. Key topics (max {MAX_TOPICS})\n\
         2. Important entities (people, organizations, locations)\n\
         3. Main themes\n\
         4. Research questions that provide valuable context\n\
         \n\
         Document:\n\
         {content}\n\
         \n\
         Respond in JSON format with keys: topics, entities, themes, research_questions"
    )
}

pub fn parse_analysis(reply: &str, model_id: &str) -> Result<DocumentAnalysis, CapabilityError> {
    let value = extract_json_object(reply).ok_or_else(|| {
        CapabilityError::new(
            Capability::Inference,
            "analysis reply did not contain a JSON object",
        )
    })?;

    let mut topics = string_list(value.get("topics"));
    topics.truncate(MAX_TOPICS);

    Ok(DocumentAnalysis {
        topics,
        entities: value.get("entities").cloned().unwrap_or(Value::Null),
        themes: string_list(value.get("themes")),
        research_questions: string_list(value.get("research_questions")),
        model_id: model_id.to_string(),
    })
}

/// Strings stay as they are; other scalars and objects are rendered as JSON.
fn string_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(entries)) = value else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::Null => None,
            Value::String(text) => Some(text.trim().to_string()),
            other => Some(other.to_string()),
        })
        .filter(|text| !text.is_empty())
        .collect()
}

pub fn run_analysis(
    context: &StageContext<'_>,
    document_id: &str,
) -> Result<StageOutcome, CoordinatorError> {
    let model_id = context.config.analysis.model_id.as_str();

    context
        .coordinator()
        .run_stage(StageId::Analysis, document_id, |item| {
            let content = item
                .extraction()
                .map(|document| document.content.as_str())
                .filter(|content| !content.trim().is_empty())
                .ok_or_else(|| {
                    CapabilityError::new(Capability::Extraction, "no extracted document content")
                })?;

            let request = InferenceRequest::new(model_id, build_analysis_prompt(content));
            let reply = context.model.complete(&request)?;
            let analysis = parse_analysis(&reply, model_id)?;

            info!(
                document_id = %item.document_id,
                topics = analysis.topics.len(),
                research_questions = analysis.research_questions.len(),
                "document_analyzed"
            );
            Ok(StagePayload::Analysis(analysis))
        })
}
