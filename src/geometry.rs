use geo::{BoundingRect, Coord, LineString, Polygon, Rect};
use proj::Proj;

use crate::error::{MosaicError, Result};

/// Axis-aligned rectangle in some projection. `min` is never greater than
/// `max` on either axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    min: Coord,
    max: Coord,
}

impl BoundingBox {
    pub fn new(a: Coord, b: Coord) -> Self {
        Self {
            min: Coord {
                x: a.x.min(b.x),
                y: a.y.min(b.y),
            },
            max: Coord {
                x: a.x.max(b.x),
                y: a.y.max(b.y),
            },
        }
    }

    /// Parses `[min_x, min_y, max_x, max_y]`.
    pub fn from_array(values: [f64; 4]) -> Result<Self> {
        if values.iter().any(|v| !v.is_finite()) {
            return Err(MosaicError::Configuration(format!(
                "bounding box {values:?} contains non-finite values"
            )));
        }
        Ok(Self::new(
            Coord {
                x: values[0],
                y: values[1],
            },
            Coord {
                x: values[2],
                y: values[3],
            },
        ))
    }

    pub fn min(&self) -> Coord {
        self.min
    }

    pub fn max(&self) -> Coord {
        self.max
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    pub fn to_polygon(&self) -> Polygon {
        Rect::new(self.min, self.max).to_polygon()
    }
}

/// The area to retrieve: a polygon tagged with the CRS its coordinates are in.
///
/// Starts out as a rectangle, but turns into a general quadrilateral once its
/// corners are reprojected into the tile service's CRS.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetArea {
    polygon: Polygon,
    crs: String,
}

impl TargetArea {
    pub fn from_bbox(bbox: BoundingBox, crs: impl Into<String>) -> Self {
        Self {
            polygon: bbox.to_polygon(),
            crs: crs.into(),
        }
    }

    pub fn from_polygon(polygon: Polygon, crs: impl Into<String>) -> Self {
        Self {
            polygon,
            crs: crs.into(),
        }
    }

    pub fn polygon(&self) -> &Polygon {
        &self.polygon
    }

    pub fn crs(&self) -> &str {
        &self.crs
    }

    pub fn envelope(&self) -> Result<BoundingBox> {
        self.polygon
            .bounding_rect()
            .map(|rect| BoundingBox::new(rect.min(), rect.max()))
            .ok_or_else(|| MosaicError::Configuration("target area is empty".to_string()))
    }

    /// Reprojects every vertex of the area into `crs`. A no-op when the area is
    /// already expressed in that CRS.
    pub fn reproject_to(&self, crs: &str) -> Result<TargetArea> {
        if same_crs(&self.crs, crs) {
            return Ok(TargetArea {
                polygon: self.polygon.clone(),
                crs: crs.to_string(),
            });
        }
        let transform = Proj::new_known_crs(&self.crs, crs, None).map_err(|err| {
            MosaicError::Projection(format!(
                "failed to build {} → {} transform: {err}",
                self.crs, crs
            ))
        })?;
        let ring = self
            .polygon
            .exterior()
            .coords()
            .map(|coord| {
                transform
                    .convert((coord.x, coord.y))
                    .map(|(x, y)| Coord { x, y })
                    .map_err(|err| {
                        MosaicError::Projection(format!(
                            "{} → {} transform failed for ({:.6}, {:.6}): {err}",
                            self.crs, crs, coord.x, coord.y
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        if ring.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
            return Err(MosaicError::Projection(format!(
                "target area does not project into {crs}"
            )));
        }
        Ok(TargetArea {
            polygon: Polygon::new(LineString::from(ring), Vec::new()),
            crs: crs.to_string(),
        })
    }
}

fn same_crs(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn bbox_normalises_corners() {
        let bbox = BoundingBox::new(Coord { x: 5.0, y: -1.0 }, Coord { x: 1.0, y: 3.0 });
        assert_eq!(bbox.min(), Coord { x: 1.0, y: -1.0 });
        assert_eq!(bbox.max(), Coord { x: 5.0, y: 3.0 });
        assert_eq!(bbox.width(), 4.0);
        assert_eq!(bbox.height(), 4.0);
    }

    #[test]
    fn bbox_rejects_nan() {
        let err = BoundingBox::from_array([0.0, f64::NAN, 1.0, 1.0]).unwrap_err();
        assert!(matches!(err, MosaicError::Configuration(_)));
    }

    #[test]
    fn envelope_of_rotated_polygon() {
        let polygon = Polygon::new(
            LineString::from(vec![(0.0, 5.0), (5.0, 0.0), (10.0, 5.0), (5.0, 10.0), (0.0, 5.0)]),
            Vec::new(),
        );
        let area = TargetArea::from_polygon(polygon, "EPSG:3857");
        let envelope = area.envelope().unwrap();
        assert_eq!(envelope.min(), Coord { x: 0.0, y: 0.0 });
        assert_eq!(envelope.max(), Coord { x: 10.0, y: 10.0 });
    }

    #[test]
    fn reprojects_geographic_area_to_web_mercator() {
        let bbox = BoundingBox::from_array([2.0, 48.0, 3.0, 49.0]).unwrap();
        let area = TargetArea::from_bbox(bbox, "EPSG:4326");
        let projected = area.reproject_to("EPSG:3857").unwrap();
        assert_eq!(projected.crs(), "EPSG:3857");

        const RADIUS: f64 = 6378137.0;
        let mercator = |c: &Coord| Coord {
            x: RADIUS * c.x.to_radians(),
            y: RADIUS * (std::f64::consts::FRAC_PI_4 + c.y.to_radians() / 2.0).tan().ln(),
        };
        let source = area.polygon().exterior();
        let target = projected.polygon().exterior();
        assert_eq!(source.0.len(), target.0.len());
        for (from, to) in source.coords().zip(target.coords()) {
            let expected = mercator(from);
            assert_relative_eq!(to.x, expected.x, max_relative = 1e-9);
            assert_relative_eq!(to.y, expected.y, max_relative = 1e-9);
        }

        let envelope = projected.envelope().unwrap();
        assert_relative_eq!(envelope.min().x, 222638.98158654713, max_relative = 1e-9);
        assert_relative_eq!(envelope.max().y, 6274861.394006577, max_relative = 1e-9);
    }

    #[test]
    fn reproject_to_same_crs_is_identity() {
        let bbox = BoundingBox::from_array([1.0, 2.0, 3.0, 4.0]).unwrap();
        let area = TargetArea::from_bbox(bbox, "EPSG:3857");
        let same = area.reproject_to("epsg:3857").unwrap();
        assert_eq!(same.polygon(), area.polygon());
        assert_eq!(same.crs(), "epsg:3857");
    }
}
