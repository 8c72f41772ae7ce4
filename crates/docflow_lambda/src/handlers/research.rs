use docflow_core::contract::{
    Reliability, ResearchFinding, ResearchFindings, StageId, StagePayload,
};
use docflow_core::coordinator::StageOutcome;
use docflow_core::error::{CapabilityError, CoordinatorError};
use serde_json::Value;
use tracing::{info, warn};

use super::StageContext;
use crate::adapters::inference::{extract_json_object, InferenceModel, InferenceRequest};
use crate::adapters::search::{SearchHit, WebSearch};
use crate::config::ResearchSettings;

pub const SUMMARY_MAX_TOKENS: u32 = 1500;
pub const SUMMARY_TEMPERATURE: f32 = 0.1;
pub const UNPARSEABLE_REPLY_SUMMARY: &str = "Error parsing model response";

pub fn build_research_prompt(question: &str, hits: &[SearchHit]) -> String {
    let results = serde_json::to_string_pretty(hits).unwrap_or_else(|_| "[]".to_string());
    format!(
        "You are a research assistant. Summarize the following search results for the question:\n\
         \n\
         Question: {question}\n\
         Results: {results}\n\
         \n\
         Provide a factual, concise answer in JSON format:\n\
         {{\n  \"summary\": \"...\",\n  \"reliability_score\": \"High/Medium/Low\",\n  \
         \"sources\": [\"url1\", \"url2\"],\n  \"key_findings\": [\"finding1\", \"finding2\"]\n}}"
    )
}

pub fn parse_finding(question: &str, reply: &str) -> ResearchFinding {
    let Some(value) = extract_json_object(reply) else {
        return ResearchFinding::unreliable(question, UNPARSEABLE_REPLY_SUMMARY);
    };

    let strings = |field: &str| -> Vec<String> {
        value
            .get(field)
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };

    ResearchFinding {
        question: question.to_string(),
        summary: value
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        reliability: value
            .get("reliability_score")
            .and_then(Value::as_str)
            .map(Reliability::from_label)
            .unwrap_or(Reliability::Low),
        sources: strings("sources"),
        key_findings: strings("key_findings"),
    }
}

/// Searches and summarises one question; failures become a low-reliability finding.
pub fn research_question(
    search: &dyn WebSearch,
    model: &dyn InferenceModel,
    settings: &ResearchSettings,
    question: &str,
) -> ResearchFinding {
    let attempt = || -> Result<ResearchFinding, CapabilityError> {
        let hits = search.search(question, settings.max_results)?;
        let prompt = build_research_prompt(question, &hits);
        let request = InferenceRequest::new(&settings.model_id, prompt)
            .with_max_tokens(SUMMARY_MAX_TOKENS)
            .with_temperature(SUMMARY_TEMPERATURE);
        let reply = model.complete(&request)?;
        Ok(parse_finding(question, &reply))
    };

    attempt().unwrap_or_else(|error| {
        warn!(question, error = %error, "research_question_failed");
        ResearchFinding::unreliable(question, format!("Error processing question: {error}"))
    })
}

pub fn run_research(
    context: &StageContext<'_>,
    document_id: &str,
) -> Result<StageOutcome, CoordinatorError> {
    let settings = &context.config.research;

    context
        .coordinator()
        .run_stage(StageId::Research, document_id, |item| {
            let questions = item
                .analysis()
                .map(|analysis| analysis.research_questions.as_slice())
                .unwrap_or_default();
            if questions.len() > settings.max_questions {
                info!(
                    document_id = %item.document_id,
                    dropped = questions.len() - settings.max_questions,
                    "research_questions_capped"
                );
            }

            let findings: Vec<ResearchFinding> = questions
                .iter()
                .take(settings.max_questions)
                .map(|question| {
                    research_question(context.search, context.model, settings, question)
                })
                .collect();

            info!(
                document_id = %item.document_id,
                findings = findings.len(),
                low_reliability = findings
                    .iter()
                    .filter(|finding| finding.reliability == Reliability::Low)
                    .count(),
                "research_completed"
            );
            Ok(StagePayload::Research(ResearchFindings {
                findings,
                model_id: settings.model_id.clone(),
            }))
        })
}
