//! Process-wide stream context.
//!
//! Built once at startup and shared with request handlers. The registry is
//! connected lazily on first use; if that fails, resumability stays off for
//! the lifetime of the process.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::registry::{DurableRegistry, MemoryRegistry, StreamRegistry};
use crate::resume::DEFAULT_RESUME_WINDOW;
use crate::stream::{ActiveGenerations, DEFAULT_TEE_BUFFER};

pub const DEFAULT_KEY_PREFIX: &str = "chatbot-streams";
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryBackend {
    Memory,
    Redb { path: PathBuf },
    Disabled,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub registry: RegistryBackend,
    pub key_prefix: String,
    pub resume_window: Duration,
    pub tee_buffer: usize,
    pub stale_after: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            registry: RegistryBackend::Memory,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            resume_window: DEFAULT_RESUME_WINDOW,
            tee_buffer: DEFAULT_TEE_BUFFER,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

pub struct StreamContext {
    settings: StreamSettings,
    registry: OnceCell<Option<Arc<dyn StreamRegistry>>>,
    active: ActiveGenerations,
}

impl StreamContext {
    pub fn new(settings: StreamSettings) -> Self {
        Self {
            settings,
            registry: OnceCell::new(),
            active: ActiveGenerations::new(),
        }
    }

    /// Context around an already connected registry.
    pub fn with_registry(settings: StreamSettings, registry: Arc<dyn StreamRegistry>) -> Self {
        Self {
            settings,
            registry: OnceCell::new_with(Some(Some(registry))),
            active: ActiveGenerations::new(),
        }
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    pub fn active(&self) -> &ActiveGenerations {
        &self.active
    }

    /// The registry, connecting on first call. `None` when resumability is off.
    pub async fn registry(&self) -> Option<Arc<dyn StreamRegistry>> {
        self.registry
            .get_or_init(|| async {
                match connect(&self.settings).await {
                    Ok(registry) => registry,
                    Err(err) => {
                        error!(error = %err, "Stream registry unavailable, resumable streams disabled");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    /// Cancel every in-flight generation. Returns how many were cancelled.
    pub fn shutdown(&self) -> usize {
        let cancelled = self.active.cancel_all();
        if cancelled > 0 {
            info!(cancelled, "Cancelled in-flight generations");
        }
        cancelled
    }
}

async fn connect(settings: &StreamSettings) -> Result<Option<Arc<dyn StreamRegistry>>> {
    match &settings.registry {
        RegistryBackend::Disabled => {
            info!("Resumable streams disabled by configuration");
            Ok(None)
        }
        RegistryBackend::Memory => {
            info!("Using in-memory stream registry");
            Ok(Some(Arc::new(MemoryRegistry::new())))
        }
        RegistryBackend::Redb { path } => {
            info!(path = %path.display(), "Using redb stream registry");
            let path = path.clone();
            let prefix = settings.key_prefix.clone();
            let storage = tokio::task::spawn_blocking(move || {
                chatrelay_storage::open_stream_log(&path, &prefix)
            })
            .await??;
            Ok(Some(Arc::new(DurableRegistry::new(
                storage,
                settings.stale_after,
            ))))
        }
    }
}
