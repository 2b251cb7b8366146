//! The service object handed to collaborators (route layer, CLI,
//! exporters). Built once at startup; cheap to clone.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::GeometryCache;
use crate::collector::{BoundaryCollector, CollectOptions, VillageBoundaries};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::fetcher::{PlotFetcher, PlotOutcome};
use crate::navigator::LevelNavigator;
use crate::plot_list::PlotListFetcher;
use crate::transport::SessionTransport;
use crate::types::{Category, LevelEntry, LocationCode, PlotRecord};

#[derive(Clone)]
pub struct PlotEngine {
    config: Arc<EngineConfig>,
    cache: Arc<GeometryCache>,
    navigator: LevelNavigator,
    plot_lists: PlotListFetcher,
    fetcher: PlotFetcher,
    collector: BoundaryCollector,
}

impl PlotEngine {
    /// Validate the config, open the cache, and wire up the components.
    ///
    /// Fails fast on an invalid config or an uncreatable cache directory.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;

        let cache = Arc::new(GeometryCache::open(
            config.cache_path.clone(),
            config.auto_persist,
        )?);
        let transport = SessionTransport::new(&config)?;

        let navigator = LevelNavigator::new(transport.clone(), &config);
        let plot_lists = PlotListFetcher::new(transport.clone(), &config);
        let fetcher = PlotFetcher::new(transport, Arc::clone(&cache), &config);
        let collector = BoundaryCollector::new(
            plot_lists.clone(),
            fetcher.clone(),
            Arc::clone(&cache),
            &config,
        );

        tracing::info!(
            "Plot engine ready: {} (cache {}, {} plots)",
            config.base_url,
            cache.path().display(),
            cache.len()
        );

        Ok(Self {
            config: Arc::new(config),
            cache,
            navigator,
            plot_lists,
            fetcher,
            collector,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<GeometryCache> {
        &self.cache
    }

    pub async fn fetch_districts(&self, category: Category) -> Vec<LevelEntry> {
        self.navigator.fetch_districts(category).await
    }

    pub async fn fetch_talukas(
        &self,
        district_code: &str,
        category: Category,
    ) -> Vec<LevelEntry> {
        self.navigator.fetch_talukas(district_code, category).await
    }

    pub async fn fetch_villages(
        &self,
        district_code: &str,
        taluka_code: &str,
        category: Category,
    ) -> Vec<LevelEntry> {
        self.navigator
            .fetch_villages(district_code, taluka_code, category)
            .await
    }

    /// Plot numbers of a village in server order. Empty on any failure.
    pub async fn fetch_plot_list(
        &self,
        district_code: &str,
        taluka_code: &str,
        village_code: &str,
        category: Category,
    ) -> Vec<String> {
        let location = LocationCode::new(category, district_code, taluka_code, village_code);
        self.plot_lists.fetch_plot_list(&location).await
    }

    pub async fn get_plot_coordinates(
        &self,
        location: &LocationCode,
        plot_no: &str,
    ) -> Option<PlotRecord> {
        self.fetcher.get(location, plot_no).await
    }

    /// Like [`PlotEngine::get_plot_coordinates`] but reports why a plot is
    /// missing.
    pub async fn lookup_plot(
        &self,
        location: &LocationCode,
        plot_no: &str,
        cancel: &CancellationToken,
    ) -> PlotOutcome {
        self.fetcher.lookup(location, plot_no, cancel).await
    }

    /// Fetch every plot of a village. `None` limits fall back to the
    /// configured defaults.
    pub async fn fetch_village_boundaries(
        &self,
        location: &LocationCode,
        max_plots: Option<usize>,
        max_workers: Option<usize>,
    ) -> VillageBoundaries {
        let mut options = CollectOptions::from_config(&self.config);
        if let Some(n) = max_plots {
            options.max_plots = n;
        }
        if let Some(n) = max_workers {
            options.max_workers = n;
        }
        self.collector
            .collect(location, options, &CancellationToken::new())
            .await
    }

    /// Batch fetch with explicit options and an external cancellation token.
    pub async fn collect_village(
        &self,
        location: &LocationCode,
        options: CollectOptions,
        cancel: &CancellationToken,
    ) -> VillageBoundaries {
        self.collector.collect(location, options, cancel).await
    }

    /// Re-read the cache file, merging entries not yet in memory.
    pub fn load_cache(&self) -> usize {
        self.cache.load()
    }

    pub async fn save_cache(&self) -> EngineResult<usize> {
        self.cache.save_async().await
    }

    /// Save the cache only if it holds plots not yet on disk. Returns the
    /// number of plots written, or `None` when nothing was pending.
    pub async fn flush_cache(&self) -> EngineResult<Option<usize>> {
        let cache = Arc::clone(&self.cache);
        tokio::task::spawn_blocking(move || cache.flush())
            .await
            .map_err(|e| EngineError::cache_io(self.cache.path(), std::io::Error::other(e)))?
    }
}

impl std::fmt::Debug for PlotEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlotEngine")
            .field("base_url", &self.config.base_url)
            .field("cache", &self.cache.path())
            .finish()
    }
}
