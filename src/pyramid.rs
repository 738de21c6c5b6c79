use geo_types::Coord;

use crate::error::{MosaicError, Result};

/// One zoom level of a tile pyramid. `resolution` is the ground distance
/// covered by one pixel, in units of the service CRS.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelOfDetail {
    pub id: u32,
    pub resolution: f64,
}

/// Pixel dimensions of one tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileSize {
    pub cols: u32,
    pub rows: u32,
}

/// Which way service row numbers run away from the grid origin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RowOrigin {
    /// Row 0 sits just below the origin and rows increase southward (ArcGIS).
    #[default]
    Top,
    /// Row 0 sits just above the origin and rows increase northward.
    Bottom,
}

/// Tile pyramid as advertised by a tile service.
#[derive(Clone, Debug, PartialEq)]
pub struct TilePyramidDescriptor {
    levels: Vec<LevelOfDetail>,
    origin: Coord,
    tile_size: TileSize,
    row_origin: RowOrigin,
}

impl TilePyramidDescriptor {
    pub fn new(
        levels: Vec<LevelOfDetail>,
        origin: Coord,
        tile_size: TileSize,
        row_origin: RowOrigin,
    ) -> Result<Self> {
        if tile_size.cols == 0 || tile_size.rows == 0 {
            return Err(MosaicError::Configuration(format!(
                "tile size {}x{} must be non-zero",
                tile_size.cols, tile_size.rows
            )));
        }
        if !origin.x.is_finite() || !origin.y.is_finite() {
            return Err(MosaicError::Configuration(
                "tile grid origin is not finite".to_string(),
            ));
        }
        if let Some(bad) = levels
            .iter()
            .find(|lod| !lod.resolution.is_finite() || lod.resolution <= 0.0)
        {
            return Err(MosaicError::Configuration(format!(
                "level {} has invalid resolution {}",
                bad.id, bad.resolution
            )));
        }
        Ok(Self {
            levels,
            origin,
            tile_size,
            row_origin,
        })
    }

    pub fn levels(&self) -> &[LevelOfDetail] {
        &self.levels
    }

    pub fn origin(&self) -> Coord {
        self.origin
    }

    pub fn tile_size(&self) -> TileSize {
        self.tile_size
    }

    pub fn row_origin(&self) -> RowOrigin {
        self.row_origin
    }

    pub fn select_level(&self, target_resolution: f64) -> Result<LevelOfDetail> {
        select_level(&self.levels, target_resolution)
    }
}

/// Picks the coarsest level that is still finer than `target_resolution`:
/// the largest resolution strictly below the target. When the target is finer
/// than every level, the finest level available is returned instead.
pub fn select_level(levels: &[LevelOfDetail], target_resolution: f64) -> Result<LevelOfDetail> {
    if !target_resolution.is_finite() || target_resolution <= 0.0 {
        return Err(MosaicError::Configuration(format!(
            "resolution must be a positive number, got {target_resolution}"
        )));
    }
    let mut sorted = levels.to_vec();
    sorted.sort_by(|a, b| b.resolution.total_cmp(&a.resolution));
    let fallback = sorted.last().copied().ok_or_else(|| {
        MosaicError::Configuration("tile service advertises no levels of detail".to_string())
    })?;
    Ok(sorted
        .into_iter()
        .find(|lod| lod.resolution < target_resolution)
        .unwrap_or(fallback))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lod(id: u32, resolution: f64) -> LevelOfDetail {
        LevelOfDetail { id, resolution }
    }

    #[test]
    fn picks_largest_resolution_below_target() {
        let levels = [lod(0, 10.0), lod(1, 5.0), lod(2, 1.0)];
        assert_eq!(select_level(&levels, 6.0).unwrap().id, 1);
    }

    #[test]
    fn ignores_input_order() {
        let levels = [lod(2, 1.0), lod(0, 10.0), lod(1, 5.0)];
        assert_eq!(select_level(&levels, 6.0).unwrap().id, 1);
        assert_eq!(select_level(&levels, 100.0).unwrap().id, 0);
    }

    #[test]
    fn equal_resolution_is_not_strictly_below() {
        let levels = [lod(0, 10.0), lod(1, 5.0), lod(2, 1.0)];
        assert_eq!(select_level(&levels, 5.0).unwrap().id, 2);
    }

    #[test]
    fn falls_back_to_minimum_resolution() {
        let levels = [lod(0, 10.0), lod(1, 5.0), lod(2, 1.0)];
        let chosen = select_level(&levels, 0.5).unwrap();
        assert_eq!(chosen, lod(2, 1.0));
    }

    #[test]
    fn selected_level_respects_target_for_many_targets() {
        let levels = [lod(3, 0.25), lod(0, 8.0), lod(2, 0.5), lod(1, 2.0)];
        let min = levels
            .iter()
            .map(|l| l.resolution)
            .fold(f64::INFINITY, f64::min);
        for step in 1..200 {
            let target = step as f64 * 0.05;
            let chosen = select_level(&levels, target).unwrap();
            if levels.iter().any(|l| l.resolution < target) {
                assert!(chosen.resolution < target);
                assert!(
                    levels
                        .iter()
                        .filter(|l| l.resolution < target)
                        .all(|l| l.resolution <= chosen.resolution)
                );
            } else {
                assert_eq!(chosen.resolution, min);
            }
        }
    }

    #[test]
    fn rejects_invalid_target() {
        let levels = [lod(0, 10.0)];
        for target in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                select_level(&levels, target),
                Err(MosaicError::Configuration(_))
            ));
        }
    }

    #[test]
    fn rejects_empty_pyramid() {
        assert!(matches!(
            select_level(&[], 1.0),
            Err(MosaicError::Configuration(_))
        ));
    }

    #[test]
    fn descriptor_validates_tile_size() {
        let result = TilePyramidDescriptor::new(
            vec![lod(0, 1.0)],
            Coord { x: 0.0, y: 0.0 },
            TileSize { cols: 0, rows: 256 },
            RowOrigin::Top,
        );
        assert!(matches!(result, Err(MosaicError::Configuration(_))));
    }
}
