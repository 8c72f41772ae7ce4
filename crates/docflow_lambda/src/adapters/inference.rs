//! Text generation through Bedrock's Anthropic messages API.

use aws_sdk_bedrockruntime::primitives::Blob;
use docflow_core::error::{Capability, CapabilityError};
use serde_json::{json, Value};
use tracing::info;

use super::block_on;

pub const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
pub const DEFAULT_MAX_TOKENS: u32 = 4000;

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub model_id: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl InferenceRequest {
    pub fn new(model_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            prompt: prompt.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceReply {
    pub text: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

pub trait InferenceModel {
    fn complete(&self, request: &InferenceRequest) -> Result<String, CapabilityError>;
}

pub fn anthropic_request_body(request: &InferenceRequest) -> Value {
    let mut body = json!({
        "anthropic_version": ANTHROPIC_VERSION,
        "max_tokens": request.max_tokens,
        "messages": [{"role": "user", "content": request.prompt}],
    });
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

pub fn parse_anthropic_response(body: &[u8]) -> Result<InferenceReply, CapabilityError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|error| inference_error(format!("model response is not JSON: {error}")))?;
    let text = value
        .pointer("/content/0/text")
        .and_then(Value::as_str)
        .ok_or_else(|| inference_error("model response has no text content"))?;

    Ok(InferenceReply {
        text: text.to_string(),
        input_tokens: value.pointer("/usage/input_tokens").and_then(Value::as_u64),
        output_tokens: value.pointer("/usage/output_tokens").and_then(Value::as_u64),
    })
}

/// Finds the JSON object in a model reply, tolerating code fences and
/// surrounding prose.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

pub struct BedrockInferenceModel {
    client: aws_sdk_bedrockruntime::Client,
}

impl BedrockInferenceModel {
    pub fn new(client: aws_sdk_bedrockruntime::Client) -> Self {
        Self { client }
    }
}

impl InferenceModel for BedrockInferenceModel {
    fn complete(&self, request: &InferenceRequest) -> Result<String, CapabilityError> {
        let body = serde_json::to_vec(&anthropic_request_body(request))
            .map_err(|error| inference_error(format!("failed to encode request: {error}")))?;
        let client = self.client.clone();
        let model_id = request.model_id.clone();

        let response = block_on(async move {
            client
                .invoke_model()
                .model_id(model_id)
                .content_type("application/json")
                .accept("application/json")
                .body(Blob::new(body))
                .send()
                .await
        })
        .map_err(|error| {
            inference_error(format!(
                "invoke_model failed for {}: {error}",
                request.model_id
            ))
        })?;

        let reply = parse_anthropic_response(response.body().as_ref())?;
        info!(
            model_id = %request.model_id,
            input_tokens = reply.input_tokens,
            output_tokens = reply.output_tokens,
            "model_invoked"
        );
        Ok(reply.text)
    }
}

fn inference_error(message: impl Into<String>) -> CapabilityError {
    CapabilityError::new(Capability::Inference, message)
}
