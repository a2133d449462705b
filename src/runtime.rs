//! Shared handles used by the executor, the assembler, the sweep and the
//! coordinator.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::assembly::FailurePolicy;
use crate::config::{BlockvoiceConfig, StoreBackend};
use crate::hooks::{JobHooks, LoggingHooks};
use crate::normalize::{DiacritizerClient, TextNormalizer};
use crate::providers::{ProviderRegistry, Synthesizer};
use crate::storage::StorageManager;
use crate::store::{JobStore, MemoryStore, SledStore};
use crate::workspace::Workspace;

#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub synthesis_timeout: Duration,
    pub job_timeout: Duration,
    pub retention: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for Settings {
    fn default() -> Self {
        let config = BlockvoiceConfig::default();
        Self::from(&config)
    }
}

impl From<&BlockvoiceConfig> for Settings {
    fn from(config: &BlockvoiceConfig) -> Self {
        Self {
            synthesis_timeout: config.synthesis_timeout(),
            job_timeout: config.job_timeout(),
            retention: config.retention(),
            failure_policy: config.failure_policy,
        }
    }
}

#[derive(Clone)]
pub struct Runtime {
    pub store: Arc<dyn JobStore>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub normalizer: Option<Arc<dyn TextNormalizer>>,
    pub storage: StorageManager,
    pub workspace: Workspace,
    pub hooks: Arc<dyn JobHooks>,
    pub settings: Settings,
}

impl Runtime {
    pub fn from_config(config: &BlockvoiceConfig) -> Result<Self> {
        let store: Arc<dyn JobStore> = match config.store.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Sled => Arc::new(
                SledStore::open(&config.store.path)
                    .with_context(|| format!("failed to open store at {}", config.store.path.display()))?,
            ),
        };

        let synthesizer = ProviderRegistry::from_config(&config.providers, config.synthesis_timeout());
        let normalizer = config.diacritizer_url.as_ref().map(|url| {
            Arc::new(DiacritizerClient::new(url.clone(), config.synthesis_timeout())) as Arc<dyn TextNormalizer>
        });
        let storage = StorageManager::from_config(&config.storage, config.synthesis_timeout())
            .context("failed to configure artifact storage")?;

        info!(
            store = ?config.store.backend,
            temp_dir = %config.temp_dir.display(),
            normalizer = normalizer.is_some(),
            "runtime initialized"
        );

        Ok(Self {
            store,
            synthesizer: Arc::new(synthesizer),
            normalizer,
            storage,
            workspace: Workspace::new(&config.temp_dir),
            hooks: Arc::new(LoggingHooks),
            settings: Settings::from(config),
        })
    }
}
