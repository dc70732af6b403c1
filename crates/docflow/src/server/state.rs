//! Application state for the gateway

use parking_lot::RwLock;
use std::sync::Arc;

use crate::config::DocflowConfig;
use crate::dispatch::ServiceClient;
use crate::documents::{DocumentRegistry, Exporter};
use crate::editor::EditorBridge;
use crate::error::Result;
use crate::jobs::{EventHub, JobRegistry, JobWatcher};
use crate::paths::PathTranslator;
use crate::schema::SchemaStore;
use crate::storage::StorageLayout;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: DocflowConfig,
    layout: StorageLayout,
    translator: PathTranslator,
    /// Client for every external processing service
    client: ServiceClient,
    jobs: Arc<JobRegistry>,
    watcher: JobWatcher,
    documents: DocumentRegistry,
    schemas: SchemaStore,
    exporter: Exporter,
    editor: EditorBridge,
    ready: RwLock<bool>,
}

impl AppState {
    /// Create new application state
    pub async fn new(config: DocflowConfig) -> Result<Self> {
        tracing::info!("Initializing gateway state...");

        let layout = StorageLayout::new(&config.storage.public_root, &config.storage.data_root);
        for dir in [layout.upload_root(), layout.save_root()] {
            if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                tracing::warn!(dir = %dir.display(), error = %e, "Cannot create storage directory");
            }
        }

        let translator = PathTranslator::new(config.paths.mappings.clone());
        tracing::info!("Path translator initialized ({} mappings)", translator.mappings().len());

        let client = ServiceClient::new(config.services.clone());
        let jobs = Arc::new(JobRegistry::new(EventHub::default()));
        let watcher = JobWatcher::new(
            Arc::clone(&jobs),
            client.clone(),
            layout.clone(),
            config.polling.clone(),
            config.storage.default_user.clone(),
        );

        let editor = EditorBridge::new(layout.clone(), config.editor.clone(), config.services.timeout_secs);
        tracing::info!(public_base = %config.editor.public_base, ds_base = %config.editor.ds_base(), "Editor bridge initialized");

        Ok(Self {
            inner: Arc::new(AppStateInner {
                documents: DocumentRegistry::new(layout.clone()),
                schemas: SchemaStore::new(layout.clone()),
                exporter: Exporter::new(layout.public_root()),
                config,
                layout,
                translator,
                client,
                jobs,
                watcher,
                editor,
                ready: RwLock::new(true),
            }),
        })
    }

    /// Get configuration
    pub fn config(&self) -> &DocflowConfig {
        &self.inner.config
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.inner.layout
    }

    pub fn translator(&self) -> &PathTranslator {
        &self.inner.translator
    }

    pub fn client(&self) -> &ServiceClient {
        &self.inner.client
    }

    /// Process-scoped job table
    pub fn jobs(&self) -> &Arc<JobRegistry> {
        &self.inner.jobs
    }

    pub fn watcher(&self) -> &JobWatcher {
        &self.inner.watcher
    }

    pub fn documents(&self) -> &DocumentRegistry {
        &self.inner.documents
    }

    pub fn schemas(&self) -> &SchemaStore {
        &self.inner.schemas
    }

    pub fn exporter(&self) -> &Exporter {
        &self.inner.exporter
    }

    pub fn editor(&self) -> &EditorBridge {
        &self.inner.editor
    }

    /// User id for requests that carry none
    pub fn default_user(&self) -> &str {
        &self.inner.config.storage.default_user
    }

    /// Check if the server is ready
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.read()
    }

    /// Set ready state
    pub fn set_ready(&self, ready: bool) {
        *self.inner.ready.write() = ready;
    }
}
