use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use docflow_core::contract::{document_id_for, Reliability, SourceLocation, StageId, WorkStatus};
use docflow_core::error::{Capability, CapabilityError};
use docflow_core::test_helpers::{InMemoryStateStore, RecordingInvoker};
use docflow_lambda::adapters::inference::{InferenceModel, InferenceRequest};
use docflow_lambda::adapters::object_store::ObjectStore;
use docflow_lambda::adapters::search::{SearchHit, WebSearch};
use docflow_lambda::config::RuntimeConfig;
use docflow_lambda::handlers::{handle_stage_event, ApiGatewayResponse, StageContext};
use serde_json::{json, Value};

#[derive(Default)]
struct MemoryObjects {
    objects: Mutex<HashMap<(String, String), (Vec<u8>, String)>>,
}

impl MemoryObjects {
    fn seed(&self, bucket: &str, key: &str, body: &[u8]) {
        self.objects.lock().expect("poisoned mutex").insert(
            (bucket.to_string(), key.to_string()),
            (body.to_vec(), "text/plain".to_string()),
        );
    }

    fn object(&self, bucket: &str, key: &str) -> Option<(Vec<u8>, String)> {
        self.objects
            .lock()
            .expect("poisoned mutex")
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }
}

impl ObjectStore for MemoryObjects {
    fn read_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, String> {
        self.object(bucket, key)
            .map(|(body, _)| body)
            .ok_or_else(|| format!("no such key: {key}"))
    }

    fn write_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<(), String> {
        self.objects.lock().expect("poisoned mutex").insert(
            (bucket.to_string(), key.to_string()),
            (body.to_vec(), content_type.to_string()),
        );
        Ok(())
    }
}

#[derive(Default)]
struct QueuedModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
    models: Mutex<Vec<String>>,
}

impl QueuedModel {
    fn push(&self, reply: Result<&str, &str>) {
        self.replies
            .lock()
            .expect("poisoned mutex")
            .push_back(reply.map(str::to_string).map_err(str::to_string));
    }

    fn models(&self) -> Vec<String> {
        self.models.lock().expect("poisoned mutex").clone()
    }
}

impl InferenceModel for QueuedModel {
    fn complete(&self, request: &InferenceRequest) -> Result<String, CapabilityError> {
        self.models
            .lock()
            .expect("poisoned mutex")
            .push(request.model_id.clone());
        self.replies
            .lock()
            .expect("poisoned mutex")
            .pop_front()
            .unwrap_or_else(|| Err("no reply queued".to_string()))
            .map_err(|message| CapabilityError::new(Capability::Inference, message))
    }
}

struct StaticSearch;

impl WebSearch for StaticSearch {
    fn search(&self, query: &str, _max_results: usize) -> Result<Vec<SearchHit>, CapabilityError> {
        if query.contains("unanswerable") {
            return Err(CapabilityError::new(Capability::Search, "HTTP 432"));
        }
        Ok(vec![SearchHit {
            title: "Source".to_string(),
            url: "https://example.org/solar".to_string(),
            content: "Solar capacity grew quickly.".to_string(),
            score: 0.9,
            published_date: String::new(),
        }])
    }
}

struct Deployment {
    store: InMemoryStateStore,
    invoker: RecordingInvoker,
    objects: MemoryObjects,
    model: QueuedModel,
    search: StaticSearch,
    configs: HashMap<StageId, RuntimeConfig>,
}

impl Deployment {
    fn new(stage_order: &str) -> Self {
        let configs = StageId::ALL
            .into_iter()
            .filter_map(|stage| {
                RuntimeConfig::from_lookup(|name| match name {
                    "DOCFLOW_STAGE" => Some(stage.to_string()),
                    "STAGE_ORDER" => Some(stage_order.to_string()),
                    "REPORT_BUCKET" => Some("reports-bucket".to_string()),
                    "RESEARCH_MAX_QUESTIONS" => Some("2".to_string()),
                    _ => None,
                })
                .ok()
                .map(|config| (stage, config))
            })
            .collect();

        Self {
            store: InMemoryStateStore::new(),
            invoker: RecordingInvoker::new(),
            objects: MemoryObjects::default(),
            model: QueuedModel::default(),
            search: StaticSearch,
            configs,
        }
    }

    fn invoke(&self, stage: StageId, event: Value) -> ApiGatewayResponse {
        let context = StageContext {
            config: &self.configs[&stage],
            store: &self.store,
            invoker: &self.invoker,
            objects: &self.objects,
            model: &self.model,
            search: &self.search,
        };
        handle_stage_event(event, &context).expect("no retryable failure expected")
    }

    /// Delivers the handoff recorded at `index` to the stage whose function it names.
    fn deliver(&self, index: usize) -> Option<ApiGatewayResponse> {
        let invocation = self.invoker.invocations().into_iter().nth(index)?;
        let stage = self
            .configs
            .iter()
            .find(|(stage, config)| {
                config.coordinator.routes.function_name(**stage) == invocation.function_name
            })
            .map(|(stage, _)| *stage)
            .expect("handoff targets a deployed stage");
        let event: Value =
            serde_json::from_slice(&invocation.payload).expect("handoff should be json");
        Some(self.invoke(stage, event))
    }

    /// Follows handoffs until the chain stops dispatching.
    fn drain_handoffs(&self) -> Vec<ApiGatewayResponse> {
        let mut responses = Vec::new();
        while let Some(response) = self.deliver(responses.len()) {
            responses.push(response);
        }
        responses
    }
}

fn upload_event(key: &str) -> Value {
    json!({"Records": [{
        "eventSource": "aws:s3",
        "s3": {"bucket": {"name": "uploads"}, "object": {"key": key, "eTag": "etag-1"}}
    }]})
}

fn body(response: &ApiGatewayResponse) -> Value {
    serde_json::from_str(&response.body).expect("body should be json")
}

#[test]
fn upload_flows_through_all_four_stages() {
    let deployment = Deployment::new("extraction,analysis,research,report");
    deployment.objects.seed(
        "uploads",
        "inbox/solar brief.md",
        b"# Solar brief\nResidential solar adoption doubled in two years.",
    );
    deployment.model.push(Ok(r#"Sure! {"topics": ["solar"], "entities": {}, "themes": ["growth"],
        "research_questions": [
            "How fast is solar growing?", "What is unanswerable here?", "Third?"
        ]}"#));
    deployment.model.push(Ok(r#"{"summary": "Fast.", "reliability_score": "High",
        "sources": ["https://example.org/solar"], "key_findings": ["doubling"]}"#));
    deployment.model.push(Ok("Executive Summary\nSolar is growing."));

    let response = deployment.invoke(StageId::Extraction, upload_event("inbox/solar+brief.md"));
    assert_eq!(response.status_code, 200);
    let responses = deployment.drain_handoffs();
    assert_eq!(responses.len(), 3);
    assert!(responses.iter().all(|response| response.status_code == 200));
    assert_eq!(body(&responses[2])["results"][0]["outcome"], "completed");

    let source = SourceLocation::new("uploads", "inbox/solar brief.md").with_etag("etag-1");
    let document_id = document_id_for(&source);
    let item = deployment.store.item(&document_id).expect("item stored");
    assert_eq!(item.status, WorkStatus::Completed);
    assert_eq!(item.stage_results.len(), 4);

    let research = item.research().expect("research recorded");
    // RESEARCH_MAX_QUESTIONS caps the third question.
    assert_eq!(research.findings.len(), 2);
    assert_eq!(research.findings[0].reliability, Reliability::High);
    assert_eq!(research.findings[1].reliability, Reliability::Low);
    assert!(research.findings[1]
        .summary
        .starts_with("Error processing question"));

    let report = item.report().expect("report recorded");
    assert_eq!(
        report.key,
        format!("reports/dataset=reports/document_id={document_id}/report.txt")
    );
    let (stored, content_type) = deployment
        .objects
        .object("reports-bucket", &report.key)
        .expect("report written");
    assert_eq!(stored, b"Executive Summary\nSolar is growing.".to_vec());
    assert_eq!(content_type, "text/plain; charset=utf-8");

    assert_eq!(
        deployment.model.models(),
        vec![
            "anthropic.claude-3-sonnet-20240229-v1:0".to_string(),
            "anthropic.claude-3-sonnet-20240229-v1:0".to_string(),
            "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
        ]
    );
}

#[test]
fn analysis_failure_stops_the_chain() {
    let deployment = Deployment::new("extraction,analysis,research,report");
    deployment
        .objects
        .seed("uploads", "brief.txt", b"Residential solar adoption doubled.");
    deployment.model.push(Err("ThrottlingException"));

    deployment.invoke(StageId::Extraction, upload_event("brief.txt"));
    let responses = deployment.drain_handoffs();

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status_code, 500);
    assert_eq!(body(&responses[0])["error"], "capability_error");
    assert_eq!(
        deployment.invoker.function_names(),
        vec!["analysis-agent".to_string()]
    );

    let document_id =
        document_id_for(&SourceLocation::new("uploads", "brief.txt").with_etag("etag-1"));
    let item = deployment.store.item(&document_id).expect("item stored");
    assert_eq!(item.status, WorkStatus::Failed);
    let failure = item.failure.expect("failure recorded");
    assert_eq!(failure.stage, StageId::Analysis);
    assert!(failure.message.contains("ThrottlingException"));
}

#[test]
fn chain_without_research_reports_from_analysis_alone() {
    let deployment = Deployment::new("extraction,analysis,report");
    deployment
        .objects
        .seed("uploads", "data.json", br#"{"region": "EU", "growth": 0.4}"#);
    deployment
        .model
        .push(Ok(r#"{"topics": ["growth"], "research_questions": ["Why EU?"]}"#));
    deployment.model.push(Ok("Short report."));

    deployment.invoke(StageId::Extraction, upload_event("data.json"));
    let responses = deployment.drain_handoffs();

    assert_eq!(responses.len(), 2);
    assert_eq!(
        deployment.invoker.function_names(),
        vec!["analysis-agent".to_string(), "report-generation-agent".to_string()]
    );

    let document_id =
        document_id_for(&SourceLocation::new("uploads", "data.json").with_etag("etag-1"));
    let item = deployment.store.item(&document_id).expect("item stored");
    assert_eq!(item.status, WorkStatus::Completed);
    assert!(item.research().is_none());
    let extracted = item.extraction().expect("extraction recorded");
    assert_eq!(extracted.extraction_method, "json_parse");
}

#[test]
fn redelivered_handoff_is_acknowledged_without_rerunning() {
    let deployment = Deployment::new("extraction,analysis,research,report");
    deployment
        .objects
        .seed("uploads", "brief.txt", b"Residential solar adoption doubled.");
    deployment
        .model
        .push(Ok(r#"{"topics": [], "research_questions": []}"#));

    deployment.invoke(StageId::Extraction, upload_event("brief.txt"));
    let first = deployment.deliver(0).expect("analysis handoff");
    assert_eq!(first.status_code, 200);

    let document_id =
        document_id_for(&SourceLocation::new("uploads", "brief.txt").with_etag("etag-1"));
    let replay = deployment.invoke(StageId::Analysis, json!({"session_id": document_id}));

    assert_eq!(replay.status_code, 200);
    assert_eq!(body(&replay)["results"][0]["outcome"], "duplicate_ignored");
    // Research has not run yet, so its handoff is re-submitted.
    assert_eq!(body(&replay)["results"][0]["redispatched"], "research");
    assert_eq!(deployment.model.models().len(), 1);
}
