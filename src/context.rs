//! Per-process relay context
//!
//! Built once at cold start and passed by reference to every invocation.
//! The secret cache is its only mutable state.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::collaborators::{CredentialStore, FindingSink, MessageQueue, ObjectStore};
use crate::config::RelayConfig;
use crate::error_handling::{RelayError, RelayResult};
use crate::normalizer::EventNormalizer;
use crate::ocsf::TemplateRegistry;

pub struct RelayContext {
    pub config: RelayConfig,
    pub normalizer: EventNormalizer,
    pub templates: TemplateRegistry,
    queue: Option<Arc<dyn MessageQueue>>,
    object_store: Option<Arc<dyn ObjectStore>>,
    finding_sink: Option<Arc<dyn FindingSink>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    secret_cache: Mutex<HashMap<String, Map<String, Value>>>,
}

impl RelayContext {
    /// Context without templates or clients; attach them with the `with_*` methods
    pub fn new(config: RelayConfig) -> Self {
        Self {
            normalizer: EventNormalizer::from_config(&config),
            config,
            templates: TemplateRegistry::default(),
            queue: None,
            object_store: None,
            finding_sink: None,
            credentials: None,
            secret_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Validate `config` and load the mapping templates from its template directory
    pub fn from_config(config: RelayConfig) -> RelayResult<Self> {
        config.validate()?;
        let templates = TemplateRegistry::load_dir(&config.template_dir)?;
        info!(
            source = %config.source_name,
            version = %config.processor_version,
            templates = templates.len(),
            "relay context initialized"
        );
        Ok(Self::new(config).with_templates(templates))
    }

    pub fn with_templates(mut self, templates: TemplateRegistry) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn MessageQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    pub fn with_finding_sink(mut self, sink: Arc<dyn FindingSink>) -> Self {
        self.finding_sink = Some(sink);
        self
    }

    pub fn with_credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    pub fn queue(&self) -> RelayResult<&dyn MessageQueue> {
        self.queue
            .as_deref()
            .ok_or_else(|| RelayError::configuration("no message queue client configured"))
    }

    pub fn object_store(&self) -> RelayResult<&dyn ObjectStore> {
        self.object_store
            .as_deref()
            .ok_or_else(|| RelayError::configuration("no object store client configured"))
    }

    pub fn finding_sink(&self) -> RelayResult<&dyn FindingSink> {
        self.finding_sink
            .as_deref()
            .ok_or_else(|| RelayError::configuration("no finding sink client configured"))
    }

    /// Secret by name, fetched once per process
    pub async fn secret(&self, name: &str) -> RelayResult<Map<String, Value>> {
        let mut cache = self.secret_cache.lock().await;
        if let Some(secret) = cache.get(name) {
            return Ok(secret.clone());
        }

        let store = self
            .credentials
            .as_deref()
            .ok_or_else(|| RelayError::configuration("no credential store configured"))?;
        debug!(secret = name, "fetching secret");
        let secret = store.get_secret(name).await?;
        cache.insert(name.to_string(), secret.clone());
        Ok(secret)
    }

    /// The secret named by `CREDENTIALS_SECRET_NAME`, if one is configured
    pub async fn provider_credentials(&self) -> RelayResult<Option<Map<String, Value>>> {
        match self.config.credentials_secret_name.as_deref() {
            Some(name) => self.secret(name).await.map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CredentialStore for CountingStore {
        async fn get_secret(&self, _name: &str) -> RelayResult<Map<String, Value>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"client_secret": "s3cr3t"}).as_object().cloned().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_secret_is_cached() {
        let store = Arc::new(CountingStore { calls: AtomicUsize::new(0) });
        let config = RelayConfig {
            credentials_secret_name: Some("relay/azure".into()),
            ..RelayConfig::default()
        };
        let ctx = RelayContext::new(config).with_credentials(store.clone());

        for _ in 0..3 {
            let secret = ctx.provider_credentials().await.unwrap().unwrap();
            assert_eq!(secret["client_secret"], "s3cr3t");
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_clients_are_configuration_errors() {
        let ctx = RelayContext::new(RelayConfig::default());
        assert_eq!(ctx.queue().err().map(|e| e.error_code()), Some("CONFIG_ERROR"));
        assert!(ctx.object_store().is_err());
        assert!(ctx.finding_sink().is_err());
        assert!(ctx.secret("x").await.is_err());
        assert_eq!(ctx.provider_credentials().await.unwrap(), None);
    }
}
