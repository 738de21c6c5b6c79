//! Tile grid arithmetic for one level of a pyramid.
//!
//! Grid coordinates are signed: a tile's `row`/`col` is the lower boundary of
//! its cell counted in tile units from the pyramid origin, so cells left of or
//! below the origin have negative indices. Services address tiles by
//! non-negative numbers instead, see [`TileIndex::address`].

use std::fmt;

use geo::{Coord, Polygon, Rect};

use crate::geometry::BoundingBox;
use crate::pyramid::{LevelOfDetail, RowOrigin, TilePyramidDescriptor};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileIndex {
    pub level: u32,
    pub row: i64,
    pub col: i64,
}

impl TileIndex {
    /// Converts grid coordinates into the row/column numbers the service uses
    /// in request paths.
    pub fn address(&self, row_origin: RowOrigin) -> TileAddress {
        let row = match row_origin {
            RowOrigin::Top => (self.row + 1).unsigned_abs(),
            RowOrigin::Bottom => self.row.unsigned_abs(),
        };
        TileAddress {
            level: self.level,
            row,
            col: self.col,
        }
    }

    /// Stable file stem, unique per tile within a pyramid.
    pub fn file_stem(&self) -> String {
        format!("{}_{}_{}", self.level, self.row, self.col)
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(level {}, row {}, col {})", self.level, self.row, self.col)
    }
}

/// A tile as addressed by the tile service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileAddress {
    pub level: u32,
    pub row: u64,
    pub col: i64,
}

impl TileAddress {
    pub fn relative_path(&self) -> String {
        format!("tile/{}/{}/{}", self.level, self.row, self.col)
    }
}

/// Geographic extent of one tile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileBounds {
    pub upper_left: Coord,
    pub lower_right: Coord,
}

impl TileBounds {
    pub fn to_polygon(&self) -> Polygon {
        Rect::new(self.upper_left, self.lower_right).to_polygon()
    }

    pub fn center(&self) -> Coord {
        Coord {
            x: (self.upper_left.x + self.lower_right.x) / 2.0,
            y: (self.upper_left.y + self.lower_right.y) / 2.0,
        }
    }
}

/// A tile whose cell overlaps the target envelope.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CandidateTile {
    pub index: TileIndex,
    pub bounds: TileBounds,
}

/// The tile grid of a single pyramid level.
#[derive(Clone, Copy, Debug)]
pub struct TileGrid {
    level: LevelOfDetail,
    origin: Coord,
    span_x: f64,
    span_y: f64,
}

impl TileGrid {
    pub fn new(pyramid: &TilePyramidDescriptor, level: LevelOfDetail) -> Self {
        let tile_size = pyramid.tile_size();
        Self {
            level,
            origin: pyramid.origin(),
            span_x: level.resolution * tile_size.cols as f64,
            span_y: level.resolution * tile_size.rows as f64,
        }
    }

    pub fn level(&self) -> LevelOfDetail {
        self.level
    }

    /// Inclusive-exclusive index ranges `(rows, cols)` of the cells touching `bbox`.
    pub fn index_range(&self, bbox: &BoundingBox) -> (std::ops::Range<i64>, std::ops::Range<i64>) {
        let min = bbox.min();
        let max = bbox.max();
        let col_lo = ((min.x - self.origin.x) / self.span_x).floor() as i64;
        let col_hi = ((max.x - self.origin.x) / self.span_x).ceil() as i64;
        let row_lo = ((min.y - self.origin.y) / self.span_y).floor() as i64;
        let row_hi = ((max.y - self.origin.y) / self.span_y).ceil() as i64;
        (row_lo..row_hi, col_lo..col_hi)
    }

    /// Number of cells `index_range` yields for `bbox`, or `None` when the
    /// count does not fit in a `usize`.
    pub fn cell_count(&self, bbox: &BoundingBox) -> Option<usize> {
        let (rows, cols) = self.index_range(bbox);
        let span = |range: std::ops::Range<i64>| {
            let len = range.end.checked_sub(range.start)?.max(0);
            usize::try_from(len).ok()
        };
        span(rows)?.checked_mul(span(cols)?)
    }

    /// Every cell whose bounds could intersect `bbox`, row-major.
    pub fn enumerate(&self, bbox: &BoundingBox) -> Vec<TileIndex> {
        let (rows, cols) = self.index_range(bbox);
        rows.flat_map(|row| {
            cols.clone().map(move |col| TileIndex {
                level: self.level.id,
                row,
                col,
            })
        })
        .collect()
    }

    pub fn candidates(&self, bbox: &BoundingBox) -> Vec<CandidateTile> {
        self.enumerate(bbox)
            .into_iter()
            .map(|index| CandidateTile {
                index,
                bounds: self.bounds(index),
            })
            .collect()
    }

    pub fn bounds(&self, index: TileIndex) -> TileBounds {
        let left = self.origin.x + index.col as f64 * self.span_x;
        let right = self.origin.x + (index.col + 1) as f64 * self.span_x;
        let bottom = self.origin.y + index.row as f64 * self.span_y;
        let top = self.origin.y + (index.row + 1) as f64 * self.span_y;
        TileBounds {
            upper_left: Coord { x: left, y: top },
            lower_right: Coord {
                x: right,
                y: bottom,
            },
        }
    }

    /// The cell containing `coord`.
    pub fn index_of(&self, coord: Coord) -> TileIndex {
        TileIndex {
            level: self.level.id,
            row: ((coord.y - self.origin.y) / self.span_y).floor() as i64,
            col: ((coord.x - self.origin.x) / self.span_x).floor() as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use approx::assert_relative_eq;

    use super::*;
    use crate::pyramid::TileSize;

    fn grid(origin: (f64, f64), tile: u32, resolution: f64) -> TileGrid {
        let level = LevelOfDetail { id: 3, resolution };
        let pyramid = TilePyramidDescriptor::new(
            vec![level],
            Coord {
                x: origin.0,
                y: origin.1,
            },
            TileSize {
                cols: tile,
                rows: tile,
            },
            RowOrigin::Top,
        )
        .unwrap();
        TileGrid::new(&pyramid, level)
    }

    fn bbox(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> BoundingBox {
        BoundingBox::from_array([min_x, min_y, max_x, max_y]).unwrap()
    }

    fn row_cols(tiles: &[TileIndex]) -> Vec<(i64, i64)> {
        tiles.iter().map(|t| (t.row, t.col)).collect()
    }

    #[test]
    fn four_tiles_around_a_corner() {
        let grid = grid((0.0, 0.0), 256, 1.0);
        let tiles = grid.enumerate(&bbox(100.0, 100.0, 300.0, 300.0));
        assert_eq!(row_cols(&tiles), vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
        assert!(tiles.iter().all(|t| t.level == 3));
    }

    #[test]
    fn bbox_inside_one_tile_yields_one_tile() {
        let grid = grid((-1000.0, 2000.0), 512, 0.5);
        let bounds = grid.bounds(TileIndex {
            level: 3,
            row: -4,
            col: 7,
        });
        let inner = bbox(
            bounds.upper_left.x + 10.0,
            bounds.lower_right.y + 10.0,
            bounds.lower_right.x - 10.0,
            bounds.upper_left.y - 10.0,
        );
        let tiles = grid.enumerate(&inner);
        assert_eq!(row_cols(&tiles), vec![(-4, 7)]);
    }

    #[test]
    fn whole_tiles_are_not_padded() {
        let grid = grid((0.0, 0.0), 256, 2.0);
        let span = 512.0;
        let tiles = grid.enumerate(&bbox(-span, span, 2.0 * span, 4.0 * span));
        assert_eq!(tiles.len(), 3 * 3);
        let unique: HashSet<_> = tiles.iter().collect();
        assert_eq!(unique.len(), tiles.len());
    }

    #[test]
    fn cell_count_matches_enumeration() {
        let grid = grid((0.0, 0.0), 256, 1.0);
        let area = bbox(-300.0, 100.0, 700.0, 900.0);
        assert_eq!(grid.cell_count(&area), Some(grid.enumerate(&area).len()));
        assert_eq!(grid.cell_count(&bbox(256.0, 0.0, 256.0, 100.0)), Some(0));
    }

    #[test]
    fn cell_count_of_huge_area_does_not_overflow() {
        let grid = grid((0.0, 0.0), 256, 1.0);
        assert_eq!(grid.cell_count(&bbox(-1e300, -1e300, 1e300, 1e300)), None);
        assert_eq!(
            grid.cell_count(&bbox(0.0, 0.0, 300_000.0, 300_000.0)),
            Some(1172 * 1172)
        );
    }

    #[test]
    fn degenerate_bbox_on_grid_line_yields_nothing() {
        let grid = grid((0.0, 0.0), 256, 1.0);
        assert!(grid.enumerate(&bbox(256.0, 0.0, 256.0, 100.0)).is_empty());
    }

    #[test]
    fn bounds_follow_origin_and_resolution() {
        let grid = grid((-20037508.342789244, 20037508.342789244), 256, 4.777314267823516);
        let bounds = grid.bounds(TileIndex {
            level: 3,
            row: -3,
            col: 2,
        });
        let span = 256.0 * 4.777314267823516;
        assert_relative_eq!(bounds.upper_left.x, -20037508.342789244 + 2.0 * span);
        assert_relative_eq!(bounds.lower_right.x, -20037508.342789244 + 3.0 * span);
        assert_relative_eq!(bounds.upper_left.y, 20037508.342789244 - 2.0 * span);
        assert_relative_eq!(bounds.lower_right.y, 20037508.342789244 - 3.0 * span);
    }

    #[test]
    fn bounds_round_trip_through_index_of() {
        let grid = grid((-180.0, 90.0), 256, 0.01);
        for row in -5..3 {
            for col in -2..4 {
                let index = TileIndex { level: 3, row, col };
                assert_eq!(grid.index_of(grid.bounds(index).center()), index);
            }
        }
    }

    #[test]
    fn top_origin_rows_use_upper_boundary() {
        let index = TileIndex {
            level: 5,
            row: -3,
            col: 12,
        };
        let address = index.address(RowOrigin::Top);
        assert_eq!(address.row, 2);
        assert_eq!(address.col, 12);
        assert_eq!(address.relative_path(), "tile/5/2/12");
        let first = TileIndex {
            level: 5,
            row: -1,
            col: 0,
        };
        assert_eq!(first.address(RowOrigin::Top).row, 0);
    }

    #[test]
    fn bottom_origin_rows_use_lower_boundary() {
        let index = TileIndex {
            level: 1,
            row: 4,
            col: 0,
        };
        assert_eq!(index.address(RowOrigin::Bottom).relative_path(), "tile/1/4/0");
    }
}
