use std::sync::OnceLock;

use docflow_core::error::{Capability, CapabilityError};
use tracing::warn;

use super::block_on;

pub trait SecretSource {
    fn secret(&self, name: &str) -> Result<String, CapabilityError>;
}

/// Reads SecureString parameters from SSM Parameter Store.
pub struct SsmSecretSource {
    ssm_client: aws_sdk_ssm::Client,
}

impl SsmSecretSource {
    pub fn new(ssm_client: aws_sdk_ssm::Client) -> Self {
        Self { ssm_client }
    }
}

impl SecretSource for SsmSecretSource {
    fn secret(&self, name: &str) -> Result<String, CapabilityError> {
        let client = self.ssm_client.clone();
        let parameter_name = name.to_string();

        let output = block_on(async move {
            client
                .get_parameter()
                .name(parameter_name)
                .with_decryption(true)
                .send()
                .await
        })
        .map_err(|error| {
            CapabilityError::new(
                Capability::Search,
                format!("failed to read parameter {name}: {error}"),
            )
        })?;

        output
            .parameter()
            .and_then(|parameter| parameter.value())
            .filter(|value| !value.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                CapabilityError::new(Capability::Search, format!("parameter {name} has no value"))
            })
    }
}

/// Search API key, taken from configuration or looked up in the parameter
/// store on first use. Only a successful lookup is kept; a failed one is
/// retried by the next search.
pub struct ApiKeyResolver {
    parameter: Option<(String, Box<dyn SecretSource + Send + Sync>)>,
    resolved: OnceLock<String>,
}

impl ApiKeyResolver {
    pub fn configured(key: Option<String>) -> Self {
        let resolved = OnceLock::new();
        if let Some(key) = key.filter(|key| !key.trim().is_empty()) {
            let _ = resolved.set(key);
        }
        Self {
            parameter: None,
            resolved,
        }
    }

    pub fn with_parameter_store(
        mut self,
        parameter_name: impl Into<String>,
        source: Box<dyn SecretSource + Send + Sync>,
    ) -> Self {
        self.parameter = Some((parameter_name.into(), source));
        self
    }

    pub fn api_key(&self) -> Option<String> {
        if let Some(key) = self.resolved.get() {
            return Some(key.clone());
        }

        let (parameter_name, source) = self.parameter.as_ref()?;
        match source.secret(parameter_name) {
            Ok(key) => Some(self.resolved.get_or_init(|| key).clone()),
            Err(error) => {
                warn!(parameter = %parameter_name, error = %error, "search_api_key_unavailable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct QueuedSecrets {
        replies: Arc<Mutex<VecDeque<Result<String, String>>>>,
        requested: Arc<Mutex<Vec<String>>>,
    }

    impl QueuedSecrets {
        fn push(&self, reply: Result<&str, &str>) {
            self.replies
                .lock()
                .expect("poisoned mutex")
                .push_back(reply.map(str::to_string).map_err(str::to_string));
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().expect("poisoned mutex").clone()
        }
    }

    impl SecretSource for QueuedSecrets {
        fn secret(&self, name: &str) -> Result<String, CapabilityError> {
            self.requested
                .lock()
                .expect("poisoned mutex")
                .push(name.to_string());
            self.replies
                .lock()
                .expect("poisoned mutex")
                .pop_front()
                .unwrap_or_else(|| Err("access denied".to_string()))
                .map_err(|message| CapabilityError::new(Capability::Search, message))
        }
    }

    fn resolver(configured: Option<&str>, secrets: &QueuedSecrets) -> ApiKeyResolver {
        ApiKeyResolver::configured(configured.map(str::to_string))
            .with_parameter_store("/lambda/tavily/api-key", Box::new(secrets.clone()))
    }

    #[test]
    fn configured_key_skips_parameter_store() {
        let secrets = QueuedSecrets::default();
        secrets.push(Ok("from-ssm"));

        let keys = resolver(Some("from-env"), &secrets);

        assert_eq!(keys.api_key().as_deref(), Some("from-env"));
        assert!(secrets.requested().is_empty());
    }

    #[test]
    fn looks_up_the_parameter_once_and_keeps_it() {
        let secrets = QueuedSecrets::default();
        secrets.push(Ok("from-ssm"));

        let keys = resolver(Some("  "), &secrets);

        assert_eq!(keys.api_key().as_deref(), Some("from-ssm"));
        assert_eq!(keys.api_key().as_deref(), Some("from-ssm"));
        assert_eq!(secrets.requested(), vec!["/lambda/tavily/api-key".to_string()]);
    }

    #[test]
    fn failed_lookup_is_retried_on_next_use() {
        let secrets = QueuedSecrets::default();
        secrets.push(Err("ThrottlingException"));
        secrets.push(Ok("from-ssm"));

        let keys = resolver(None, &secrets);

        assert_eq!(keys.api_key(), None);
        assert_eq!(keys.api_key().as_deref(), Some("from-ssm"));
        assert_eq!(keys.api_key().as_deref(), Some("from-ssm"));
        assert_eq!(secrets.requested().len(), 2);
    }

    #[test]
    fn without_key_or_parameter_store_there_is_no_key() {
        assert_eq!(ApiKeyResolver::configured(None).api_key(), None);
    }
}
