//! Wires the store, index, registry, model client and importer from a
//! [`Config`].

use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::broadcast::ImportProgressBroadcaster;
use crate::categories::CategoryRegistry;
use crate::classifier::deadline::DEFAULT_ABANDONED_SLACK;
use crate::classifier::{ModelClient, OllamaClient, TimeoutClient};
use crate::config::Config;
use crate::db::Database;
use crate::dedup::DuplicateIndex;
use crate::error::Result;
use crate::pipeline::{CategoryPolicy, Importer, IngestionPipeline};
use crate::store::MetadataStore;
use crate::thumbnail::Thumbnailer;

/// Extra time the outer deadline grants beyond the HTTP timeouts, so the
/// client's own timeout normally fires first.
const DEADLINE_SLACK: Duration = Duration::from_secs(5);

/// Upper bound for one classify call including every retry.
fn call_deadline(model: &crate::config::ModelConfig) -> Duration {
    let attempts = model.retries.saturating_add(1);
    Duration::from_secs(model.timeout_secs)
        .saturating_mul(attempts)
        .saturating_add(Duration::from_millis(model.retry_delay_ms).saturating_mul(model.retries))
        .saturating_add(DEADLINE_SLACK)
}

/// An opened image library.
pub struct Library {
    config: Config,
    database: Database,
    importer: Importer,
    broadcaster: ImportProgressBroadcaster,
}

impl Library {
    /// Opens the database (running migrations), seeds configured
    /// categories and rebuilds the duplicate index.
    pub fn open(config: Config) -> Result<Self> {
        let database = Database::open(&config.database_path())?;
        Self::with_database(config, database)
    }

    /// Like [`Library::open`] but on an already opened database.
    pub fn with_database(config: Config, database: Database) -> Result<Self> {
        let classifier = if config.model.enabled {
            let client = OllamaClient::from_config(&config.model)?;
            info!("Using model '{}' at {}", config.model.model, client.url());
            let deadline = call_deadline(&config.model);
            let client = TimeoutClient::new(Arc::new(client), deadline)
                .with_max_in_flight(config.worker_count + DEFAULT_ABANDONED_SLACK);
            Some(Arc::new(client) as Arc<dyn ModelClient>)
        } else {
            info!("Model disabled; images will stay pending");
            None
        };
        Self::assemble(config, database, classifier)
    }

    /// Opens with an explicit model client (or none), ignoring the model
    /// section of the configuration.
    pub fn with_classifier(
        config: Config,
        database: Database,
        classifier: Option<Arc<dyn ModelClient>>,
    ) -> Result<Self> {
        Self::assemble(config, database, classifier)
    }

    fn assemble(
        config: Config,
        database: Database,
        classifier: Option<Arc<dyn ModelClient>>,
    ) -> Result<Self> {
        let store: Arc<dyn MetadataStore> = Arc::new(database.clone());

        let registry = CategoryRegistry::new(Arc::clone(&store));
        for seed in &config.categories.seed {
            registry.ensure(&seed.name, &seed.description)?;
        }

        let index = Arc::new(DuplicateIndex::new());
        let indexed = index.rebuild(store.as_ref())?;
        info!(
            "Duplicate index rebuilt: {} path(s), {} duplicate group(s)",
            indexed,
            index.groups().len()
        );

        let thumbnailer =
            Thumbnailer::new(config.thumbnail_directory()).with_max_size(config.thumbnail_size);
        let mut pipeline = IngestionPipeline::new(store, index)
            .with_thumbnailer(thumbnailer)
            .with_category_policy(CategoryPolicy::from(&config.categories));
        if let Some(classifier) = classifier {
            pipeline = pipeline.with_classifier(classifier);
        }

        let broadcaster = ImportProgressBroadcaster::default();
        let importer = Importer::new(Arc::new(pipeline), config.worker_count)
            .with_broadcaster(broadcaster.clone());

        Ok(Self {
            config,
            database,
            importer,
            broadcaster,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn importer(&self) -> &Importer {
        &self.importer
    }

    pub fn pipeline(&self) -> &Arc<IngestionPipeline> {
        self.importer.pipeline()
    }

    pub fn index(&self) -> &Arc<DuplicateIndex> {
        self.pipeline().index()
    }

    pub fn categories(&self) -> &CategoryRegistry {
        self.pipeline().categories()
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        self.pipeline().store()
    }

    /// Progress events of every import started through this library.
    pub fn progress(&self) -> &ImportProgressBroadcaster {
        &self.broadcaster
    }
}
