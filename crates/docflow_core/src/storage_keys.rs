#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    Reports,
}

impl DatasetKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Reports => "reports",
        }
    }
}

pub fn partition_prefix(base_prefix: &str, dataset: DatasetKind, document_id: &str) -> String {
    let trimmed = base_prefix.trim_matches('/');
    if trimmed.is_empty() {
        format!("dataset={}/document_id={document_id}", dataset.as_str())
    } else {
        format!(
            "{trimmed}/dataset={}/document_id={document_id}",
            dataset.as_str()
        )
    }
}

/// Deterministic per document, so a redelivered report stage overwrites rather than duplicates.
pub fn report_object_key(base_prefix: &str, document_id: &str) -> String {
    format!(
        "{}/report.txt",
        partition_prefix(base_prefix, DatasetKind::Reports, document_id)
    )
}
