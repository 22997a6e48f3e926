//! Two-pool bitmap cache: full-resolution node tiles and page thumbnails

use std::sync::Arc;
use std::time::Duration;

use log::info;

use super::backend::{BitmapBackend, Clock, SystemClock};
use super::bitmap::BitmapRef;
use super::inner::{CacheStats, InnerImageCache, PoolConfig};
use crate::settings::CacheSettings;

/// Default node budget: 128 MiB
pub const DEFAULT_NODE_BYTES: usize = 128 * 1024 * 1024;

/// Default thumbnail budget: 32 MiB
pub const DEFAULT_PAGE_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageCacheStats {
    pub node: CacheStats,
    pub page: CacheStats,
}

/// Owned by whoever opens a document and dropped (or cleared) when the
/// document closes. The two pools evict independently.
pub struct ImageCache<B: BitmapBackend> {
    node: InnerImageCache<B>,
    page: InnerImageCache<B>,
}

impl<B: BitmapBackend> ImageCache<B> {
    #[must_use]
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_budgets(backend, DEFAULT_NODE_BYTES, DEFAULT_PAGE_BYTES)
    }

    #[must_use]
    pub fn with_budgets(backend: Arc<B>, node_bytes: usize, page_bytes: usize) -> Self {
        let node = PoolConfig::with_max_bytes(node_bytes);
        let page = PoolConfig::with_max_bytes(page_bytes);
        Self::with_configs(backend, node, page, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn from_settings(backend: Arc<B>, settings: &CacheSettings) -> Self {
        let timeout = Duration::from_millis(settings.candidate_timeout_ms);
        let node = PoolConfig::with_max_bytes(settings.node_bytes()).candidate_timeout(timeout);
        let page = PoolConfig::with_max_bytes(settings.page_bytes()).candidate_timeout(timeout);
        Self::with_configs(backend, node, page, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_configs(
        backend: Arc<B>,
        node: PoolConfig,
        page: PoolConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            node: InnerImageCache::with_config("node", Arc::clone(&backend), node, Arc::clone(&clock)),
            page: InnerImageCache::with_config("page", backend, page, clock),
        }
    }

    pub fn acquire_node(&self, key: &str) -> Option<BitmapRef<B>> {
        self.node.acquire(key)
    }

    pub fn put_node(&self, key: impl Into<String>, image: B::Image) {
        self.node.put(key, image);
    }

    pub fn remove_node(&self, key: &str) -> bool {
        self.node.remove(key)
    }

    pub fn acquire_page(&self, key: &str) -> Option<BitmapRef<B>> {
        self.page.acquire(key)
    }

    pub fn put_page(&self, key: impl Into<String>, image: B::Image) {
        self.page.put(key, image);
    }

    pub fn remove_page(&self, key: &str) -> bool {
        self.page.remove(key)
    }

    /// Resize the node pool. The thumbnail pool keeps its budget.
    pub fn set_max_memory(&self, bytes: usize) {
        info!(
            "node cache budget set to {:.1} MB",
            bytes as f64 / (1024.0 * 1024.0)
        );
        self.node.set_max_memory(bytes, bytes / 3);
    }

    pub fn clear(&self) {
        self.node.clear();
        self.page.clear();
    }

    #[must_use]
    pub fn node(&self) -> &InnerImageCache<B> {
        &self.node
    }

    #[must_use]
    pub fn page(&self) -> &InnerImageCache<B> {
        &self.page
    }

    #[must_use]
    pub fn stats(&self) -> ImageCacheStats {
        ImageCacheStats {
            node: self.node.stats(),
            page: self.page.stats(),
        }
    }
}
