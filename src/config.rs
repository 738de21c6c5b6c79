use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{MosaicError, Result};
use crate::fetch::DEFAULT_WORKERS;
use crate::geometry::{BoundingBox, TargetArea};
use crate::retrieve::{DEFAULT_MAX_TILES, RetrievalRequest};
use crate::service::{DEFAULT_HTTP_TIMEOUT_SECONDS, ServiceOptions};

const DEFAULT_BBOX_CRS: &str = "EPSG:4326";

/// Validated settings for one retrieval.
#[derive(Debug, Clone)]
pub struct MosaicConfig {
    url: String,
    resolution: f64,
    bbox: BoundingBox,
    bbox_crs: String,
    threads: usize,
    retries: usize,
    timeout: Duration,
    blank_tiles: bool,
    max_tiles: usize,
}

impl MosaicConfig {
    /// Reads a JSON layer file, applies `overrides` on top and validates.
    pub fn load(path: Option<&Path>, overrides: MosaicSettings) -> Result<Self> {
        let base = match path {
            Some(path) => MosaicSettings::load_from_path(path)?,
            None => MosaicSettings::default(),
        };
        Self::from_settings(base.merge(overrides))
    }

    pub fn from_settings(settings: MosaicSettings) -> Result<Self> {
        let url = settings
            .url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| MosaicError::Configuration("no service URL specified".to_string()))?;
        let resolution = settings.resolution.ok_or_else(|| {
            MosaicError::Configuration(format!("no resolution specified for {url}"))
        })?;
        if !resolution.is_finite() || resolution <= 0.0 {
            return Err(MosaicError::Configuration(format!(
                "resolution must be a positive number, got {resolution}"
            )));
        }
        let bbox = settings
            .bbox
            .ok_or_else(|| MosaicError::Configuration("no bounding box specified".to_string()))
            .and_then(BoundingBox::from_array)?;
        if bbox.width() <= 0.0 || bbox.height() <= 0.0 {
            return Err(MosaicError::Configuration(format!(
                "bounding box {:?} has no area",
                [bbox.min().x, bbox.min().y, bbox.max().x, bbox.max().y]
            )));
        }
        let timeout_seconds = settings
            .timeout_seconds
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECONDS);
        if timeout_seconds == 0 {
            return Err(MosaicError::Configuration(
                "timeout_seconds must be greater than 0".to_string(),
            ));
        }
        let max_tiles = settings.max_tiles.unwrap_or(DEFAULT_MAX_TILES);
        if max_tiles == 0 {
            return Err(MosaicError::Configuration(
                "max_tiles must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            url,
            resolution,
            bbox,
            bbox_crs: settings
                .bbox_crs
                .unwrap_or_else(|| DEFAULT_BBOX_CRS.to_string()),
            threads: settings.threads.unwrap_or(DEFAULT_WORKERS).max(1),
            retries: settings.retries.unwrap_or(0),
            timeout: Duration::from_secs(timeout_seconds),
            blank_tiles: settings.blank_tiles.unwrap_or(true),
            max_tiles,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    pub fn bbox_crs(&self) -> &str {
        &self.bbox_crs
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn retries(&self) -> usize {
        self.retries
    }

    pub fn max_tiles(&self) -> usize {
        self.max_tiles
    }

    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            timeout: self.timeout,
            blank_tiles: self.blank_tiles,
        }
    }

    pub fn request(&self) -> RetrievalRequest {
        RetrievalRequest {
            target: TargetArea::from_bbox(self.bbox, self.bbox_crs.clone()),
            resolution: self.resolution,
            max_tiles: self.max_tiles,
        }
    }
}

/// Partial settings, as found in a JSON layer file or on the command line.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MosaicSettings {
    pub url: Option<String>,
    pub resolution: Option<f64>,
    pub bbox: Option<[f64; 4]>,
    pub bbox_crs: Option<String>,
    pub threads: Option<usize>,
    pub retries: Option<usize>,
    pub timeout_seconds: Option<u64>,
    pub blank_tiles: Option<bool>,
    pub max_tiles: Option<usize>,
}

impl MosaicSettings {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|err| {
            MosaicError::Configuration(format!("failed to read config {}: {err}", path.display()))
        })?;
        serde_json::from_str(&contents).map_err(|err| {
            MosaicError::Configuration(format!("failed to parse config {}: {err}", path.display()))
        })
    }

    /// Values set in `overrides` win.
    pub fn merge(self, overrides: MosaicSettings) -> Self {
        Self {
            url: overrides.url.or(self.url),
            resolution: overrides.resolution.or(self.resolution),
            bbox: overrides.bbox.or(self.bbox),
            bbox_crs: overrides.bbox_crs.or(self.bbox_crs),
            threads: overrides.threads.or(self.threads),
            retries: overrides.retries.or(self.retries),
            timeout_seconds: overrides.timeout_seconds.or(self.timeout_seconds),
            blank_tiles: overrides.blank_tiles.or(self.blank_tiles),
            max_tiles: overrides.max_tiles.or(self.max_tiles),
        }
    }
}
