//! Fetches the tiles of an ArcGIS tile pyramid that cover an area and
//! assembles them into one georeferenced mosaic.
//!
//! The flow is: pick a pyramid level for the requested resolution
//! ([`pyramid::select_level`]), enumerate the grid cells under the target
//! envelope ([`grid::TileGrid`]), drop cells outside the target polygon
//! ([`clip::clip_tiles`]), download the survivors ([`fetch::FetchOrchestrator`])
//! and hand them to a [`raster::RasterTool`] for georeferencing and mosaicking.

pub mod clip;
pub mod config;
pub mod error;
pub mod fetch;
pub mod geometry;
pub mod grid;
pub mod pyramid;
pub mod raster;
pub mod retrieve;
pub mod service;
pub mod workspace;

pub use error::{FetchCause, MosaicError, Result};
pub use fetch::{FetchOrchestrator, FetchProgress, FetchedTile};
pub use geometry::{BoundingBox, TargetArea};
pub use grid::{CandidateTile, TileAddress, TileBounds, TileGrid, TileIndex};
pub use pyramid::{LevelOfDetail, RowOrigin, TilePyramidDescriptor, TileSize};
pub use raster::{GdalTools, RasterTool};
pub use retrieve::{
    MosaicOutput, RetrievalPlan, RetrievalRequest, execute_plan, plan_retrieval, retrieve_mosaic,
};
pub use service::{ArcGisService, RetryingService, ServiceDescription, ServiceOptions, TileService};
pub use workspace::TileWorkspace;
