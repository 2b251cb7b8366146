// Copyright 2026 Bhunaksha Contributors
// SPDX-License-Identifier: Apache-2.0

//! Plot geometry acquisition and caching engine for the Mahabhunakasha
//! cadastral map service.
//!
//! Resolves district / taluka / village codes into plot numbers, fetches
//! each plot's WKT outline and ownership text, and keeps a durable JSON
//! cache so repeated queries skip the network.

pub mod cache;
pub mod collector;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod info;
pub mod navigator;
pub mod plot_list;
pub mod transport;
pub mod types;
pub mod wkt;

pub use cache::GeometryCache;
pub use collector::{BoundaryCollector, CollectOptions, VillageBoundaries};
pub use config::{resolve_cache_path, EngineConfig};
pub use engine::PlotEngine;
pub use error::{EngineError, EngineResult};
pub use fetcher::{PlotFetcher, PlotOutcome};
pub use navigator::LevelNavigator;
pub use plot_list::{sort_plot_numbers, PlotListFetcher};
pub use transport::SessionTransport;
pub use types::*;
pub use wkt::BoundingBox;

pub use tokio_util::sync::CancellationToken;
