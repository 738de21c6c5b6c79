use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{MosaicError, Result};
use crate::grid::TileIndex;

const PART_EXTENSION: &str = "part";
const RAW_EXTENSIONS: [&str; 5] = ["jpg", "png", "tif", "gif", "img"];
const MOSAIC_FILE: &str = "mosaic.vrt";

/// Directory receiving raw tiles, their GeoTIFF counterparts and the mosaic.
///
/// An explicit directory is kept after the run and doubles as a tile cache;
/// otherwise a fresh directory is created under the system temp dir and
/// removed by [`TileWorkspace::cleanup`].
#[derive(Debug)]
pub struct TileWorkspace {
    root: PathBuf,
    auto_cleanup: bool,
}

impl TileWorkspace {
    pub fn prepare(explicit: Option<PathBuf>) -> Result<Self> {
        match explicit {
            Some(path) => {
                if path.exists() && !path.is_dir() {
                    return Err(MosaicError::Configuration(format!(
                        "workspace path {} exists and is not a directory",
                        path.display()
                    )));
                }
                fs::create_dir_all(&path).map_err(|err| MosaicError::io(&path, err))?;
                Ok(Self {
                    root: path,
                    auto_cleanup: false,
                })
            }
            None => {
                let mut base = std::env::temp_dir();
                let timestamp = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis();
                let pid = std::process::id();
                base.push(format!("tilemosaic-{}-{}", pid, timestamp));
                fs::create_dir_all(&base).map_err(|err| MosaicError::io(&base, err))?;
                Ok(Self {
                    root: base,
                    auto_cleanup: true,
                })
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn auto_cleanup(&self) -> bool {
        self.auto_cleanup
    }

    pub fn raw_tile_path(&self, index: &TileIndex, extension: &str) -> PathBuf {
        self.root.join(format!("{}.{}", index.file_stem(), extension))
    }

    /// In-progress download; renamed to the raw tile path once complete.
    pub fn partial_tile_path(&self, index: &TileIndex) -> PathBuf {
        self.root
            .join(format!("{}.{}", index.file_stem(), PART_EXTENSION))
    }

    pub fn geotiff_path(&self, index: &TileIndex) -> PathBuf {
        self.root.join(format!("{}.georef.tif", index.file_stem()))
    }

    /// A raw tile left behind by an earlier run, if any.
    pub fn cached_tile(&self, index: &TileIndex) -> Option<PathBuf> {
        RAW_EXTENSIONS
            .iter()
            .map(|ext| self.raw_tile_path(index, ext))
            .find(|path| path.is_file())
    }

    pub fn mosaic_path(&self) -> PathBuf {
        self.root.join(MOSAIC_FILE)
    }

    pub fn cleanup(&self) -> Result<()> {
        if self.auto_cleanup && self.root.exists() {
            fs::remove_dir_all(&self.root).map_err(|err| MosaicError::io(&self.root, err))?;
        }
        Ok(())
    }
}
