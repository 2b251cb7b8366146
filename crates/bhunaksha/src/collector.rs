//! Village-wide boundary collection over a bounded worker pool.
//!
//! Plot numbers are submitted in list order; a submission waits for a free
//! worker slot, so at most `max_workers` fetches are in flight. Results are
//! slotted back by index, so the output follows the plot list rather than
//! completion order.
//!
//! A batch stops submitting when its cancellation token fires, either from
//! the caller or from the optional deadline. In-flight fetches see the same
//! token and return early.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::cache::GeometryCache;
use crate::config::EngineConfig;
use crate::fetcher::{PlotFetcher, PlotOutcome};
use crate::plot_list::PlotListFetcher;
use crate::types::{LocationCode, PlotRecord};

/// Limits for one village batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectOptions {
    pub max_plots: usize,
    pub max_workers: usize,
    pub deadline: Option<Duration>,
}

impl CollectOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_plots: config.default_max_plots,
            max_workers: config.default_max_workers,
            deadline: config.batch_deadline(),
        }
    }
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Outcome of a village batch. `records` follows the plot-list order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VillageBoundaries {
    pub giscode: String,
    /// Plots the service listed for the village.
    pub total_available: usize,
    /// Plots attempted after applying `max_plots`.
    pub requested: usize,
    pub records: Vec<PlotRecord>,
    pub not_found: usize,
    pub failed: usize,
    /// Plots never fetched because the batch was cancelled.
    pub skipped: usize,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

/// Populates an entire village by fanning out plot fetches.
#[derive(Clone)]
pub struct BoundaryCollector {
    plot_lists: PlotListFetcher,
    fetcher: PlotFetcher,
    cache: Arc<GeometryCache>,
    persist_after_batch: bool,
}

impl BoundaryCollector {
    pub fn new(
        plot_lists: PlotListFetcher,
        fetcher: PlotFetcher,
        cache: Arc<GeometryCache>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            plot_lists,
            fetcher,
            cache,
            persist_after_batch: config.persist_after_batch,
        }
    }

    pub async fn collect(
        &self,
        location: &LocationCode,
        options: CollectOptions,
        cancel: &CancellationToken,
    ) -> VillageBoundaries {
        let started = Instant::now();
        let giscode = location.giscode();
        let mut report = VillageBoundaries {
            giscode: giscode.clone(),
            ..Default::default()
        };

        let mut plots = self.plot_lists.fetch_plot_list(location).await;
        report.total_available = plots.len();
        plots.truncate(options.max_plots);
        report.requested = plots.len();

        if plots.is_empty() {
            tracing::info!("No plots found in village {giscode}");
            report.elapsed_ms = started.elapsed().as_millis() as u64;
            return report;
        }

        tracing::info!(
            "Fetching geometries for {} plots of {giscode} (of {} listed, {} workers)",
            report.requested,
            report.total_available,
            options.max_workers
        );

        let batch = cancel.child_token();
        let deadline_timer = options.deadline.map(|limit| {
            let token = batch.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                tracing::warn!("Batch deadline of {limit:?} reached, cancelling");
                token.cancel();
            })
        });

        let outcomes = self
            .run_workers(location, &plots, options.max_workers, &batch)
            .await;

        if let Some(timer) = deadline_timer {
            timer.abort();
        }
        report.cancelled = batch.is_cancelled();

        for outcome in outcomes {
            match outcome {
                Some(PlotOutcome::Found(record)) => report.records.push(record),
                Some(PlotOutcome::NotFound) => report.not_found += 1,
                Some(PlotOutcome::ParseFailed { .. }) | Some(PlotOutcome::Exhausted { .. }) => {
                    report.failed += 1
                }
                Some(PlotOutcome::Cancelled) | None => report.skipped += 1,
            }
        }

        if self.persist_after_batch {
            let cache = Arc::clone(&self.cache);
            match tokio::task::spawn_blocking(move || cache.flush()).await {
                Ok(Ok(Some(count))) => tracing::debug!("Persisted {count} cached plots"),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => tracing::error!("Failed to persist plot cache: {e}"),
                Err(e) => tracing::error!("Cache persist task failed: {e}"),
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Fetched {} plot boundaries for {giscode} ({} not found, {} failed, {} skipped) in {}ms",
            report.records.len(),
            report.not_found,
            report.failed,
            report.skipped,
            report.elapsed_ms
        );
        report
    }

    /// Run one lookup per plot with at most `max_workers` in flight.
    /// Slot `i` holds the outcome for `plots[i]`, or `None` if it was never
    /// submitted.
    async fn run_workers(
        &self,
        location: &LocationCode,
        plots: &[String],
        max_workers: usize,
        batch: &CancellationToken,
    ) -> Vec<Option<PlotOutcome>> {
        let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
        let mut tasks = JoinSet::new();
        let mut slots: Vec<Option<PlotOutcome>> = vec![None; plots.len()];

        for (index, plot_no) in plots.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = batch.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let fetcher = self.fetcher.clone();
            let location = location.clone();
            let plot_no = plot_no.clone();
            let token = batch.clone();
            tasks.spawn(async move {
                let outcome = fetcher.lookup(&location, &plot_no, &token).await;
                drop(permit);
                (index, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => tracing::error!("Plot worker failed: {e}"),
            }
        }
        slots
    }
}
