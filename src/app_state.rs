use std::sync::Arc;

use crate::{
    cache::DocumentCache, config::AppConfig, drive::DocumentStore, mailer::Notifier,
    sheets::RecordStore,
};

/// Servicios compartidos, construidos una sola vez al arrancar.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub records: Arc<dyn RecordStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub notifier: Arc<dyn Notifier>,
    pub cache: Arc<DocumentCache>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        records: Arc<dyn RecordStore>,
        documents: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let cache = Arc::new(DocumentCache::new(
            config.settings.cache_ttl,
            config.settings.cache_capacity,
        ));
        Self {
            config,
            records,
            documents,
            notifier,
            cache,
        }
    }
}
