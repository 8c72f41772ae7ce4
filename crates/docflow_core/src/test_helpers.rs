//! In-memory fakes for the coordinator's storage and dispatch seams.
//!
//! Shared by unit tests here and by the Lambda crate's handler tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::contract::{HandoffPayload, WorkItem};
use crate::coordinator::{StageInvoker, StateStore};
use crate::error::StoreError;

/// Honours `expected_version` the same way the DynamoDB adapter does.
#[derive(Default)]
pub struct InMemoryStateStore {
    items: Mutex<BTreeMap<String, WorkItem>>,
    writes: Mutex<usize>,
    put_attempts: Mutex<usize>,
    scheduled_write_failures: Mutex<BTreeMap<usize, String>>,
    write_failure: Mutex<Option<String>>,
    read_failure: Mutex<Option<String>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, item: WorkItem) {
        self.items
            .lock()
            .expect("poisoned mutex")
            .insert(item.document_id.clone(), item);
    }

    pub fn item(&self, document_id: &str) -> Option<WorkItem> {
        self.items
            .lock()
            .expect("poisoned mutex")
            .get(document_id)
            .cloned()
    }

    pub fn write_count(&self) -> usize {
        *self.writes.lock().expect("poisoned mutex")
    }

    /// Every later `put` fails as unavailable until [`Self::recover`].
    pub fn fail_writes(&self, message: &str) {
        *self.write_failure.lock().expect("poisoned mutex") = Some(message.to_string());
    }

    /// Fails only the `attempt`-th `put` call (counting from 1, failed calls included).
    pub fn fail_write_attempt(&self, attempt: usize, message: &str) {
        self.scheduled_write_failures
            .lock()
            .expect("poisoned mutex")
            .insert(attempt, message.to_string());
    }

    pub fn fail_reads(&self, message: &str) {
        *self.read_failure.lock().expect("poisoned mutex") = Some(message.to_string());
    }

    pub fn recover(&self) {
        *self.write_failure.lock().expect("poisoned mutex") = None;
        *self.read_failure.lock().expect("poisoned mutex") = None;
    }
}

impl StateStore for InMemoryStateStore {
    fn get(&self, document_id: &str) -> Result<Option<WorkItem>, StoreError> {
        if let Some(message) = self.read_failure.lock().expect("poisoned mutex").clone() {
            return Err(StoreError::Unavailable(message));
        }
        Ok(self.item(document_id))
    }

    fn put(&self, item: &WorkItem, expected_version: u64) -> Result<(), StoreError> {
        let attempt = {
            let mut attempts = self.put_attempts.lock().expect("poisoned mutex");
            *attempts += 1;
            *attempts
        };
        if let Some(message) = self
            .scheduled_write_failures
            .lock()
            .expect("poisoned mutex")
            .remove(&attempt)
        {
            return Err(StoreError::Unavailable(message));
        }
        if let Some(message) = self.write_failure.lock().expect("poisoned mutex").clone() {
            return Err(StoreError::Unavailable(message));
        }

        let mut items = self.items.lock().expect("poisoned mutex");
        let current_version = items
            .get(&item.document_id)
            .map(|stored| stored.version)
            .unwrap_or(0);
        if current_version != expected_version {
            return Err(StoreError::ConditionFailed {
                document_id: item.document_id.clone(),
            });
        }

        items.insert(item.document_id.clone(), item.clone());
        *self.writes.lock().expect("poisoned mutex") += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub function_name: String,
    pub payload: Vec<u8>,
}

/// Captures successful invocations; a queued failure rejects the next one
/// without recording it.
#[derive(Default)]
pub struct RecordingInvoker {
    invocations: Mutex<Vec<Invocation>>,
    pending_failures: Mutex<Vec<String>>,
}

impl RecordingInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, message: &str) {
        self.pending_failures
            .lock()
            .expect("poisoned mutex")
            .push(message.to_string());
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().expect("poisoned mutex").clone()
    }

    pub fn function_names(&self) -> Vec<String> {
        self.invocations()
            .into_iter()
            .map(|invocation| invocation.function_name)
            .collect()
    }

    pub fn handoff_document_ids(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .map(|invocation| {
                serde_json::from_slice::<HandoffPayload>(&invocation.payload)
                    .expect("handoff payload should parse")
                    .document_id
            })
            .collect()
    }
}

impl StageInvoker for RecordingInvoker {
    fn invoke_stage(&self, function_name: &str, payload: &[u8]) -> Result<(), String> {
        let mut pending = self.pending_failures.lock().expect("poisoned mutex");
        if !pending.is_empty() {
            return Err(pending.remove(0));
        }

        self.invocations
            .lock()
            .expect("poisoned mutex")
            .push(Invocation {
                function_name: function_name.to_string(),
                payload: payload.to_vec(),
            });
        Ok(())
    }
}
