//! Environment-driven configuration, resolved once per cold start.

use docflow_core::chain::{StageChain, StageRoutes, DEFAULT_STAGE_ORDER};
use docflow_core::contract::{StageId, DEFAULT_MAX_CONTENT_CHARS};
use docflow_core::coordinator::{
    CoordinatorConfig, InvocationLimits, DEFAULT_MEMORY_MB, DEFAULT_TABLE_NAME,
    DEFAULT_TIMEOUT_SECONDS,
};
use docflow_core::error::ValidationError;
use thiserror::Error;

pub const DEFAULT_ANALYSIS_MODEL_ID: &str = "anthropic.claude-3-sonnet-20240229-v1:0";
pub const DEFAULT_RESEARCH_MODEL_ID: &str = "anthropic.claude-3-sonnet-20240229-v1:0";
pub const DEFAULT_REPORT_MODEL_ID: &str = "anthropic.claude-3-haiku-20240307-v1:0";
pub const DEFAULT_REPORT_PREFIX: &str = "reports";
pub const DEFAULT_TAVILY_API_KEY_PARAMETER: &str = "/lambda/tavily/api-key";
pub const DEFAULT_RESEARCH_MAX_QUESTIONS: usize = 5;
pub const DEFAULT_RESEARCH_MAX_RESULTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be configured")]
    Missing(&'static str),
    #[error("{name} has invalid value '{value}': {message}")]
    Invalid {
        name: &'static str,
        value: String,
        message: String,
    },
}

impl ConfigError {
    fn invalid(name: &'static str, value: &str, error: impl ToString) -> Self {
        Self::Invalid {
            name,
            value: value.to_string(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionSettings {
    pub max_content_chars: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisSettings {
    pub model_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchSettings {
    pub model_id: String,
    pub max_questions: usize,
    pub max_results: usize,
    pub tavily_api_key: Option<String>,
    pub tavily_api_key_parameter: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSettings {
    pub model_id: String,
    pub bucket: Option<String>,
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub stage: StageId,
    pub coordinator: CoordinatorConfig,
    pub extraction: ExtractionSettings,
    pub analysis: AnalysisSettings,
    pub research: ResearchSettings,
    pub report: ReportSettings,
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let value = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let stage_value = value("DOCFLOW_STAGE").ok_or(ConfigError::Missing("DOCFLOW_STAGE"))?;
        let stage: StageId = stage_value.parse().map_err(|error: ValidationError| {
            ConfigError::invalid("DOCFLOW_STAGE", &stage_value, error)
        })?;

        let order = value("STAGE_ORDER").unwrap_or_else(|| DEFAULT_STAGE_ORDER.to_string());
        let chain = StageChain::parse(&order)
            .map_err(|error| ConfigError::invalid("STAGE_ORDER", &order, error))?;
        if !chain.contains(stage) {
            return Err(ConfigError::invalid(
                "DOCFLOW_STAGE",
                &stage_value,
                "stage is not part of STAGE_ORDER",
            ));
        }

        let mut routes = StageRoutes::default();
        for candidate in StageId::ALL {
            let name = route_variable(candidate);
            if let Some(function_name) = value(name) {
                routes
                    .set(candidate, &function_name)
                    .map_err(|error| ConfigError::invalid(name, &function_name, error))?;
            }
        }
        if let (Some(next), Some(function_name)) =
            (chain.next_after(stage), value("NEXT_FUNCTION_NAME"))
        {
            routes.set(next, &function_name).map_err(|error| {
                ConfigError::invalid("NEXT_FUNCTION_NAME", &function_name, error)
            })?;
        }

        let limits = InvocationLimits {
            timeout_seconds: parse_number(
                &value,
                "STAGE_TIMEOUT_SECONDS",
                DEFAULT_TIMEOUT_SECONDS,
            )?,
            memory_mb: parse_number(&value, "STAGE_MEMORY_MB", DEFAULT_MEMORY_MB)?,
        };

        let report_bucket = value("REPORT_BUCKET");
        if stage == StageId::Report && report_bucket.is_none() {
            return Err(ConfigError::Missing("REPORT_BUCKET"));
        }

        Ok(Self {
            stage,
            coordinator: CoordinatorConfig {
                table_name: value("DYNAMODB_TABLE")
                    .unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string()),
                chain,
                routes,
                limits,
            },
            extraction: ExtractionSettings {
                max_content_chars: parse_number(
                    &value,
                    "MAX_CONTENT_SIZE",
                    DEFAULT_MAX_CONTENT_CHARS,
                )?,
            },
            analysis: AnalysisSettings {
                model_id: value("ANALYSIS_MODEL_ID")
                    .unwrap_or_else(|| DEFAULT_ANALYSIS_MODEL_ID.to_string()),
            },
            research: ResearchSettings {
                model_id: value("RESEARCH_MODEL_ID")
                    .unwrap_or_else(|| DEFAULT_RESEARCH_MODEL_ID.to_string()),
                max_questions: parse_number(
                    &value,
                    "RESEARCH_MAX_QUESTIONS",
                    DEFAULT_RESEARCH_MAX_QUESTIONS,
                )?,
                max_results: parse_number(
                    &value,
                    "RESEARCH_MAX_RESULTS",
                    DEFAULT_RESEARCH_MAX_RESULTS,
                )?,
                tavily_api_key: value("TAVILY_API_KEY"),
                tavily_api_key_parameter: value("TAVILY_API_KEY_PARAMETER")
                    .unwrap_or_else(|| DEFAULT_TAVILY_API_KEY_PARAMETER.to_string()),
            },
            report: ReportSettings {
                model_id: value("REPORT_MODEL_ID")
                    .unwrap_or_else(|| DEFAULT_REPORT_MODEL_ID.to_string()),
                bucket: report_bucket,
                prefix: value("REPORT_PREFIX")
                    .unwrap_or_else(|| DEFAULT_REPORT_PREFIX.to_string()),
            },
        })
    }
}

pub fn route_variable(stage: StageId) -> &'static str {
    match stage {
        StageId::Extraction => "EXTRACTION_FUNCTION_NAME",
        StageId::Analysis => "ANALYSIS_FUNCTION_NAME",
        StageId::Research => "RESEARCH_FUNCTION_NAME",
        StageId::Report => "REPORT_FUNCTION_NAME",
    }
}

fn parse_number<T>(
    value: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let Some(raw) = value(name) else {
        return Ok(default);
    };
    let parsed: T = raw
        .parse()
        .map_err(|error| ConfigError::invalid(name, &raw, error))?;
    if parsed <= T::default() {
        return Err(ConfigError::invalid(name, &raw, "must be greater than zero"));
    }
    Ok(parsed)
}
