use std::sync::Arc;

use crate::config::Config;
use crate::formats::FormatRegistry;
use crate::gateway::Gateway;
use crate::handlers::{Dispatcher, HandlerSet};
use crate::observability::Metrics;
use crate::storage::LocalStore;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway: Arc::new(gateway),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Wire the production gateway from configuration
    pub fn from_config(config: &Config) -> Self {
        let handlers =
            HandlerSet::from_config(&config.tools, config.storage.scratch_dir.as_deref());
        Self::new(build_gateway(config, handlers))
    }

    pub fn registry(&self) -> &FormatRegistry {
        self.gateway.registry()
    }
}

/// Gateway over the builtin registry with the given handlers
pub fn build_gateway(config: &Config, handlers: HandlerSet) -> Gateway {
    let dispatcher = Dispatcher::new(
        Arc::new(FormatRegistry::builtin()),
        handlers,
        config.conversion.job_timeout(),
    );

    Gateway::builder()
        .dispatcher(dispatcher)
        .store(LocalStore::new(
            config.storage.upload_dir.clone(),
            config.storage.output_dir.clone(),
        ))
        .max_upload_bytes(config.server.api.max_upload_bytes.as_u64())
        .maybe_max_output_age(config.retention.output_max_age())
        .build()
}
