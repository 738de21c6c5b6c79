use geo::{Area, BooleanOps, Polygon};

use crate::grid::CandidateTile;

/// Drops candidates whose rectangle does not overlap `target`.
///
/// Candidates come from the target's axis-aligned envelope, so when the target
/// is a reprojected (skewed) rectangle, corner tiles of the envelope may miss it.
pub fn clip_tiles(target: &Polygon, candidates: Vec<CandidateTile>) -> Vec<CandidateTile> {
    candidates
        .into_iter()
        .filter(|candidate| overlaps(target, &candidate.bounds.to_polygon()))
        .collect()
}

fn overlaps(target: &Polygon, tile: &Polygon) -> bool {
    let clipped = target.intersection(tile);
    !clipped.0.is_empty() && clipped.unsigned_area() > 0.0
}
