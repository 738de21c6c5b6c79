use std::path::PathBuf;

use crate::clip::clip_tiles;
use crate::error::{MosaicError, Result};
use crate::fetch::FetchOrchestrator;
use crate::geometry::{BoundingBox, TargetArea};
use crate::grid::{CandidateTile, TileGrid};
use crate::pyramid::{LevelOfDetail, RowOrigin};
use crate::raster::{RasterTool, assemble_mosaic};
use crate::service::{ServiceDescription, TileService};

pub const DEFAULT_MAX_TILES: usize = 4096;

#[derive(Clone, Debug)]
pub struct RetrievalRequest {
    pub target: TargetArea,
    /// Requested ground distance per pixel, in service CRS units.
    pub resolution: f64,
    pub max_tiles: usize,
}

impl RetrievalRequest {
    pub fn new(target: TargetArea, resolution: f64) -> Self {
        Self {
            target,
            resolution,
            max_tiles: DEFAULT_MAX_TILES,
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.resolution.is_finite() || self.resolution <= 0.0 {
            return Err(MosaicError::Configuration(format!(
                "resolution must be a positive number, got {}",
                self.resolution
            )));
        }
        Ok(())
    }
}

/// Tiles selected for a request, before anything is downloaded.
#[derive(Clone, Debug)]
pub struct RetrievalPlan {
    pub resolution: f64,
    pub level: LevelOfDetail,
    pub row_origin: RowOrigin,
    pub projection: String,
    /// Target envelope in the service CRS.
    pub envelope: BoundingBox,
    /// Cells of the envelope, before clipping.
    pub candidate_count: usize,
    pub tiles: Vec<CandidateTile>,
}

#[derive(Clone, Debug)]
pub struct MosaicOutput {
    /// The resolution the caller asked for.
    pub resolution: f64,
    pub level: LevelOfDetail,
    pub tile_count: usize,
    pub mosaic: PathBuf,
}

/// Picks a level and the tiles covering the target.
pub fn plan_retrieval(
    request: &RetrievalRequest,
    description: &ServiceDescription,
) -> Result<RetrievalPlan> {
    request.validate()?;
    let level = description.pyramid.select_level(request.resolution)?;
    let target = request.target.reproject_to(&description.projection)?;
    let envelope = target.envelope()?;
    let grid = TileGrid::new(&description.pyramid, level);
    match grid.cell_count(&envelope) {
        Some(count) if count <= request.max_tiles => {}
        count => {
            let count = count.map_or_else(|| "too many".to_string(), |n| n.to_string());
            return Err(MosaicError::Configuration(format!(
                "target envelope covers {count} tiles at level {}, exceeding the limit of {}",
                level.id, request.max_tiles
            )));
        }
    }
    let candidates = grid.candidates(&envelope);
    let candidate_count = candidates.len();
    let tiles = clip_tiles(target.polygon(), candidates);
    if tiles.len() > request.max_tiles {
        return Err(MosaicError::Configuration(format!(
            "retrieval would require {} tiles at level {}, exceeding the limit of {}",
            tiles.len(),
            level.id,
            request.max_tiles
        )));
    }
    Ok(RetrievalPlan {
        resolution: request.resolution,
        level,
        row_origin: description.pyramid.row_origin(),
        projection: description.projection.clone(),
        envelope,
        candidate_count,
        tiles,
    })
}

/// Describes the service, plans, fetches every tile and assembles the mosaic.
/// Nothing is requested from the service when the request is invalid.
pub fn retrieve_mosaic<S, R>(
    request: &RetrievalRequest,
    service: &S,
    raster: &R,
    orchestrator: &FetchOrchestrator<'_>,
) -> Result<MosaicOutput>
where
    S: TileService + ?Sized,
    R: RasterTool + ?Sized,
{
    request.validate()?;
    let description = service.describe()?;
    let plan = plan_retrieval(request, &description)?;
    execute_plan(&plan, service, raster, orchestrator)
}

/// Fetches the tiles of `plan` and assembles them. No mosaic is built unless
/// every tile was saved.
pub fn execute_plan<S, R>(
    plan: &RetrievalPlan,
    service: &S,
    raster: &R,
    orchestrator: &FetchOrchestrator<'_>,
) -> Result<MosaicOutput>
where
    S: TileService + ?Sized,
    R: RasterTool + ?Sized,
{
    let fetched = orchestrator.fetch_all(service, plan.row_origin, &plan.tiles)?;
    let mosaic = assemble_mosaic(raster, &fetched, &plan.projection, orchestrator.workspace())?;
    Ok(MosaicOutput {
        resolution: plan.resolution,
        level: plan.level,
        tile_count: fetched.len(),
        mosaic,
    })
}
