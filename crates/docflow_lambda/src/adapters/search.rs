//! Web search through the Tavily API.

use std::time::Duration;

use docflow_core::error::{Capability, CapabilityError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::block_on;
use super::parameters::ApiKeyResolver;

pub const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";
pub const TAVILY_ANSWER_URL: &str = "tavily://answer";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: String,
    pub score: f64,
    #[serde(default)]
    pub published_date: String,
}

pub trait WebSearch {
    fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, CapabilityError>;
}

pub fn tavily_request_body(api_key: &str, query: &str, max_results: usize) -> Value {
    json!({
        "api_key": api_key,
        "query": query,
        "search_depth": "advanced",
        "include_answer": true,
        "include_raw_content": false,
        "max_results": max_results,
    })
}

/// Tavily's own answer, when present, leads the hits as a synthetic result.
pub fn parse_tavily_response(body: &Value) -> Vec<SearchHit> {
    let text = |value: &Value, field: &str| {
        value
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let mut hits: Vec<SearchHit> = body
        .get("results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .map(|result| SearchHit {
                    title: text(result, "title"),
                    url: text(result, "url"),
                    content: text(result, "content"),
                    score: result.get("score").and_then(Value::as_f64).unwrap_or(0.0),
                    published_date: text(result, "published_date"),
                })
                .collect()
        })
        .unwrap_or_default();

    let answer = text(body, "answer");
    if !answer.trim().is_empty() {
        hits.insert(
            0,
            SearchHit {
                title: "Tavily AI Summary".to_string(),
                url: TAVILY_ANSWER_URL.to_string(),
                content: answer,
                score: 1.0,
                published_date: String::new(),
            },
        );
    }

    hits
}

pub struct TavilySearch {
    http_client: reqwest::Client,
    endpoint: String,
    api_keys: ApiKeyResolver,
}

impl TavilySearch {
    /// The key is resolved per search; a missing key fails that search only,
    /// so research records it as a finding.
    pub fn new(api_keys: ApiKeyResolver) -> Result<Self, CapabilityError> {
        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| search_error(format!("failed to build http client: {error}")))?;
        Ok(Self {
            http_client,
            endpoint: TAVILY_SEARCH_URL.to_string(),
            api_keys,
        })
    }
}

impl WebSearch for TavilySearch {
    fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, CapabilityError> {
        let api_key = self
            .api_keys
            .api_key()
            .ok_or_else(|| search_error("Tavily API key not found"))?;
        let body = tavily_request_body(&api_key, query, max_results);
        let client = self.http_client.clone();
        let endpoint = self.endpoint.clone();

        let response: Value = block_on(async move {
            client
                .post(endpoint)
                .json(&body)
                .send()
                .await?
                .error_for_status()?
                .json::<Value>()
                .await
        })
        .map_err(|error| search_error(format!("Tavily API request failed: {error}")))?;

        Ok(parse_tavily_response(&response))
    }
}

fn search_error(message: impl Into<String>) -> CapabilityError {
    CapabilityError::new(Capability::Search, message)
}
