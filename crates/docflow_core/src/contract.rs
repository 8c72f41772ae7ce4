use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::ValidationError;

pub const STATE_SCHEMA_VERSION: &str = "v1";
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 50_000;
pub const MAX_TOPICS: usize = 5;
pub const SUPPORTED_EXTENSIONS: [&str; 7] =
    [".pdf", ".txt", ".docx", ".doc", ".md", ".json", ".csv"];

const DOCUMENT_HASH_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Extraction,
    Analysis,
    Research,
    Report,
}

impl StageId {
    pub const ALL: [StageId; 4] = [
        StageId::Extraction,
        StageId::Analysis,
        StageId::Research,
        StageId::Report,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Analysis => "analysis",
            Self::Research => "research",
            Self::Report => "report",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| ValidationError::new(format!("Unknown stage '{}'", value.trim())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl WorkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceLocation {
    pub bucket: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl SourceLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            etag: None,
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        let etag = etag.into();
        self.etag = (!etag.trim().is_empty()).then_some(etag);
        self
    }

    pub fn filename(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// Lowercased extension including the leading dot, or an empty string.
    pub fn extension(&self) -> String {
        let filename = self.filename();
        match filename.rfind('.') {
            Some(index) if index + 1 < filename.len() => filename[index..].to_ascii_lowercase(),
            _ => String::new(),
        }
    }

    pub fn is_supported(&self) -> bool {
        let extension = self.extension();
        SUPPORTED_EXTENSIONS.contains(&extension.as_str())
    }

    pub fn uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: StageId,
    pub message: String,
    pub failed_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkItem {
    pub document_id: String,
    pub source_location: SourceLocation,
    #[serde(default)]
    pub stage_results: BTreeMap<StageId, StagePayload>,
    pub status: WorkStatus,
    pub owner: Option<StageId>,
    pub next_stage: Option<StageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
    pub version: u64,
    pub schema_version: String,
    pub created_at: String,
    pub updated_at: String,
}

impl WorkItem {
    pub fn new(
        document_id: impl Into<String>,
        source_location: SourceLocation,
        owner: StageId,
        now: &str,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            source_location,
            stage_results: BTreeMap::new(),
            status: WorkStatus::Pending,
            owner: Some(owner),
            next_stage: None,
            failure: None,
            version: 0,
            schema_version: STATE_SCHEMA_VERSION.to_string(),
            created_at: now.to_string(),
            updated_at: now.to_string(),
        }
    }

    pub fn has_result(&self, stage: StageId) -> bool {
        self.stage_results.contains_key(&stage)
    }

    pub fn extraction(&self) -> Option<&ExtractedDocument> {
        match self.stage_results.get(&StageId::Extraction) {
            Some(StagePayload::Extraction(document)) => Some(document),
            _ => None,
        }
    }

    pub fn analysis(&self) -> Option<&DocumentAnalysis> {
        match self.stage_results.get(&StageId::Analysis) {
            Some(StagePayload::Analysis(analysis)) => Some(analysis),
            _ => None,
        }
    }

    pub fn research(&self) -> Option<&ResearchFindings> {
        match self.stage_results.get(&StageId::Research) {
            Some(StagePayload::Research(findings)) => Some(findings),
            _ => None,
        }
    }

    pub fn report(&self) -> Option<&ReportArtifact> {
        match self.stage_results.get(&StageId::Report) {
            Some(StagePayload::Report(report)) => Some(report),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StagePayload {
    Extraction(ExtractedDocument),
    Analysis(DocumentAnalysis),
    Research(ResearchFindings),
    Report(ReportArtifact),
}

impl StagePayload {
    pub fn stage(&self) -> StageId {
        match self {
            Self::Extraction(_) => StageId::Extraction,
            Self::Analysis(_) => StageId::Analysis,
            Self::Research(_) => StageId::Research,
            Self::Report(_) => StageId::Report,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ContentMetadata {
    pub content_length: usize,
    pub word_count: usize,
    pub line_count: usize,
    pub has_content: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_keys: Option<Vec<String>>,
}

impl ContentMetadata {
    pub fn from_text(content: &str) -> Self {
        let line_count = if content.is_empty() {
            0
        } else {
            content.matches('\n').count() + 1
        };
        Self {
            content_length: content.chars().count(),
            word_count: content.split_whitespace().count(),
            line_count,
            has_content: !content.trim().is_empty(),
            json_keys: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedDocument {
    pub filename: String,
    pub file_extension: String,
    pub file_size: usize,
    pub extraction_method: String,
    pub content: String,
    pub content_truncated: bool,
    pub full_content_length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_content_location: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub metadata: ContentMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentAnalysis {
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub entities: Value,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub research_questions: Vec<String>,
    pub model_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Reliability {
    High,
    Medium,
    Low,
}

impl Reliability {
    /// Reads the free-form score a model returns; anything unrecognised is `Low`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "high" => Self::High,
            "medium" => Self::Medium,
            _ => Self::Low,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchFinding {
    pub question: String,
    pub summary: String,
    pub reliability: Reliability,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub key_findings: Vec<String>,
}

impl ResearchFinding {
    pub fn unreliable(question: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            summary: summary.into(),
            reliability: Reliability::Low,
            sources: Vec::new(),
            key_findings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchFindings {
    #[serde(default)]
    pub findings: Vec<ResearchFinding>,
    pub model_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportArtifact {
    pub bucket: String,
    pub key: String,
    pub model_id: String,
    pub content_length: usize,
    pub text: String,
    pub text_truncated: bool,
}

/// Body of a stage-to-stage invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandoffPayload {
    #[serde(alias = "session_id")]
    pub document_id: String,
}

pub fn document_id_for(source: &SourceLocation) -> String {
    let filename = source.filename();
    let stem = match filename.rfind('.') {
        Some(index) if index > 0 => &filename[..index],
        _ => filename,
    };
    let mut stem: String = stem
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '-'
            }
        })
        .collect();
    if stem.trim_matches('-').is_empty() {
        stem = "document".to_string();
    }

    let mut hasher = Sha256::new();
    hasher.update(source.bucket.as_bytes());
    hasher.update([0u8]);
    hasher.update(source.key.as_bytes());
    hasher.update([0u8]);
    if let Some(etag) = &source.etag {
        hasher.update(etag.trim_matches('"').as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());

    format!("{stem}_{}", &digest[..DOCUMENT_HASH_LEN])
}

/// Truncates to at most `max_chars` characters; the flag reports whether anything was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => (text[..byte_index].to_string(), true),
        None => (text.to_string(), false),
    }
}
