//! DynamoDB-backed work-item records.
//!
//! One item per `document_id`. The full [`WorkItem`] is stored as JSON in
//! `state`; `version`, `status` and `updated_at` are duplicated as top-level
//! attributes so the table can be queried and conditionally written.

use std::collections::HashMap;

use aws_sdk_dynamodb::types::AttributeValue;
use docflow_core::contract::WorkItem;
use docflow_core::coordinator::StateStore;
use docflow_core::error::StoreError;

use super::block_on;

const KEY_ATTRIBUTE: &str = "document_id";
const VERSION_ATTRIBUTE: &str = "version";
const STATUS_ATTRIBUTE: &str = "status";
const STATE_ATTRIBUTE: &str = "state";
const UPDATED_AT_ATTRIBUTE: &str = "updated_at";

pub struct DynamoDbStateStore {
    client: aws_sdk_dynamodb::Client,
    table_name: String,
}

impl DynamoDbStateStore {
    pub fn new(client: aws_sdk_dynamodb::Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

impl StateStore for DynamoDbStateStore {
    fn get(&self, document_id: &str) -> Result<Option<WorkItem>, StoreError> {
        let client = self.client.clone();
        let table_name = self.table_name.clone();
        let key = document_id.to_string();

        let output = block_on(async move {
            client
                .get_item()
                .table_name(table_name)
                .key(KEY_ATTRIBUTE, AttributeValue::S(key))
                .consistent_read(true)
                .send()
                .await
        })
        .map_err(|error| StoreError::Unavailable(format!("failed to read work item: {error}")))?;

        output
            .item
            .map(|attributes| decode_state(document_id, &attributes))
            .transpose()
    }

    fn put(&self, item: &WorkItem, expected_version: u64) -> Result<(), StoreError> {
        let attributes = encode_state(item)?;
        let condition = WriteCondition::for_version(expected_version);
        let client = self.client.clone();
        let table_name = self.table_name.clone();

        let result = block_on(async move {
            let mut request = client
                .put_item()
                .table_name(table_name)
                .set_item(Some(attributes))
                .condition_expression(condition.expression);
            for (placeholder, name) in condition.names {
                request = request.expression_attribute_names(placeholder, name);
            }
            for (placeholder, value) in condition.values {
                request = request.expression_attribute_values(placeholder, value);
            }
            request.send().await
        });

        match result {
            Ok(_) => Ok(()),
            Err(error)
                if error
                    .as_service_error()
                    .map(|service| service.is_conditional_check_failed_exception())
                    .unwrap_or(false) =>
            {
                Err(StoreError::ConditionFailed {
                    document_id: item.document_id.clone(),
                })
            }
            Err(error) => Err(StoreError::Unavailable(format!(
                "failed to write work item: {error}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct WriteCondition {
    expression: String,
    names: Vec<(String, String)>,
    values: Vec<(String, AttributeValue)>,
}

impl WriteCondition {
    fn for_version(expected_version: u64) -> Self {
        if expected_version == 0 {
            return Self {
                expression: format!("attribute_not_exists({KEY_ATTRIBUTE})"),
                names: Vec::new(),
                values: Vec::new(),
            };
        }

        Self {
            expression: "#version = :expected_version".to_string(),
            names: vec![("#version".to_string(), VERSION_ATTRIBUTE.to_string())],
            values: vec![(
                ":expected_version".to_string(),
                AttributeValue::N(expected_version.to_string()),
            )],
        }
    }
}

fn encode_state(item: &WorkItem) -> Result<HashMap<String, AttributeValue>, StoreError> {
    let state = serde_json::to_string(item).map_err(|error| StoreError::Corrupt {
        document_id: item.document_id.clone(),
        message: format!("failed to encode work item: {error}"),
    })?;

    Ok(HashMap::from([
        (
            KEY_ATTRIBUTE.to_string(),
            AttributeValue::S(item.document_id.clone()),
        ),
        (
            VERSION_ATTRIBUTE.to_string(),
            AttributeValue::N(item.version.to_string()),
        ),
        (
            STATUS_ATTRIBUTE.to_string(),
            AttributeValue::S(item.status.as_str().to_string()),
        ),
        (STATE_ATTRIBUTE.to_string(), AttributeValue::S(state)),
        (
            UPDATED_AT_ATTRIBUTE.to_string(),
            AttributeValue::S(item.updated_at.clone()),
        ),
    ]))
}

fn decode_state(
    document_id: &str,
    attributes: &HashMap<String, AttributeValue>,
) -> Result<WorkItem, StoreError> {
    let corrupt = |message: String| StoreError::Corrupt {
        document_id: document_id.to_string(),
        message,
    };

    let state = attributes
        .get(STATE_ATTRIBUTE)
        .and_then(|value| value.as_s().ok())
        .ok_or_else(|| corrupt(format!("missing string attribute '{STATE_ATTRIBUTE}'")))?;
    let mut item: WorkItem = serde_json::from_str(state)
        .map_err(|error| corrupt(format!("invalid state JSON: {error}")))?;

    // The top-level attribute is what conditional writes compare against.
    if let Some(version) = attributes
        .get(VERSION_ATTRIBUTE)
        .and_then(|value| value.as_n().ok())
    {
        item.version = version
            .parse()
            .map_err(|error| corrupt(format!("invalid version '{version}': {error}")))?;
    }

    if item.document_id != document_id {
        return Err(corrupt(format!(
            "state belongs to '{}'",
            item.document_id
        )));
    }

    Ok(item)
}
