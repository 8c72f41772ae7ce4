use std::collections::BTreeMap;

use crate::contract::StageId;
use crate::error::ValidationError;

pub const DEFAULT_STAGE_ORDER: &str = "extraction,analysis,research,report";

/// Ordered, duplicate-free list of stages a work item visits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageChain {
    stages: Vec<StageId>,
}

impl StageChain {
    pub fn new(stages: Vec<StageId>) -> Result<Self, ValidationError> {
        let Some(first) = stages.first() else {
            return Err(ValidationError::new("stage chain cannot be empty"));
        };

        if *first != StageId::Extraction {
            return Err(ValidationError::new(format!(
                "stage chain must start with '{}', found '{first}'",
                StageId::Extraction
            )));
        }

        for (index, stage) in stages.iter().enumerate() {
            if stages[..index].contains(stage) {
                return Err(ValidationError::new(format!(
                    "stage '{stage}' appears more than once in the chain"
                )));
            }
        }

        Ok(Self { stages })
    }

    /// Parses a comma-separated stage list such as `extraction,analysis,report`.
    pub fn parse(order: &str) -> Result<Self, ValidationError> {
        let stages = order
            .split(',')
            .filter(|segment| !segment.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<StageId>, _>>()?;
        Self::new(stages)
    }

    pub fn stages(&self) -> &[StageId] {
        &self.stages
    }

    pub fn initial(&self) -> StageId {
        self.stages[0]
    }

    pub fn contains(&self, stage: StageId) -> bool {
        self.stages.contains(&stage)
    }

    pub fn next_after(&self, stage: StageId) -> Option<StageId> {
        let position = self.stages.iter().position(|candidate| *candidate == stage)?;
        self.stages.get(position + 1).copied()
    }
}

impl Default for StageChain {
    fn default() -> Self {
        Self {
            stages: StageId::ALL.to_vec(),
        }
    }
}

/// Function name each stage is deployed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRoutes {
    routes: BTreeMap<StageId, String>,
}

impl StageRoutes {
    pub fn default_function_name(stage: StageId) -> &'static str {
        match stage {
            StageId::Extraction => "document-ingestion-agent",
            StageId::Analysis => "analysis-agent",
            StageId::Research => "research-agent",
            StageId::Report => "report-generation-agent",
        }
    }

    pub fn function_name(&self, stage: StageId) -> &str {
        self.routes
            .get(&stage)
            .map(String::as_str)
            .unwrap_or_else(|| Self::default_function_name(stage))
    }

    pub fn set(&mut self, stage: StageId, function_name: &str) -> Result<(), ValidationError> {
        let function_name = function_name.trim();
        if function_name.is_empty() {
            return Err(ValidationError::new(format!(
                "function name for stage '{stage}' cannot be empty"
            )));
        }
        self.routes.insert(stage, function_name.to_string());
        Ok(())
    }
}

impl Default for StageRoutes {
    fn default() -> Self {
        Self {
            routes: StageId::ALL
                .into_iter()
                .map(|stage| (stage, Self::default_function_name(stage).to_string()))
                .collect(),
        }
    }
}
