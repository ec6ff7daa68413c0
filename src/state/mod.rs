use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;

use crate::config::CacheConfig;
use crate::lifecycle::DropEngine;
use crate::models::payloads::GalleryEntry;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DropEngine>,
    pub cache: Arc<ApiCache>,
    pub start_time: Instant,
    pub webhook_secret: Option<Arc<str>>,
    pub admin_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(engine: Arc<DropEngine>, cache: Arc<ApiCache>) -> Self {
        assert!(
            cache.gallery_capacity > 0,
            "Gallery cache capacity must be configured"
        );
        Self {
            engine,
            cache,
            start_time: Instant::now(),
            webhook_secret: None,
            admin_token: None,
        }
    }

    pub fn with_webhook_secret(mut self, secret: Option<String>) -> Self {
        self.webhook_secret = secret.filter(|s| !s.is_empty()).map(Arc::from);
        self
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token.filter(|t| !t.is_empty()).map(Arc::from);
        self
    }
}

pub struct ApiCache {
    /// Keyed by the resolved page size.
    pub gallery: Cache<usize, Arc<Vec<GalleryEntry>>>,
    pub gallery_capacity: u64,
}

impl ApiCache {
    pub fn new(config: &CacheConfig) -> Self {
        assert!(
            config.gallery_max_capacity > 0,
            "Gallery cache capacity threshold"
        );

        let gallery = Cache::builder()
            .max_capacity(config.gallery_max_capacity)
            .time_to_live(Duration::from_secs(config.gallery_ttl_seconds))
            .build();

        Self {
            gallery,
            gallery_capacity: config.gallery_max_capacity,
        }
    }
}
