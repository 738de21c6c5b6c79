use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::error::{MosaicError, Result};
use crate::fetch::FetchedTile;
use crate::grid::TileBounds;
use crate::workspace::TileWorkspace;

/// Georeferencing and mosaicking capabilities of an external raster toolkit.
pub trait RasterTool {
    /// Writes a GeoTIFF at `output` that places `image` at `bounds` in `projection`.
    fn georeference(
        &self,
        image: &Path,
        bounds: &TileBounds,
        projection: &str,
        output: &Path,
    ) -> Result<PathBuf>;

    /// Merges `tiles` into a single dataset written at `output`.
    fn build_mosaic(&self, tiles: &[PathBuf], output: &Path) -> Result<PathBuf>;
}

/// Drives the GDAL command line utilities.
#[derive(Clone, Debug)]
pub struct GdalTools {
    translate: PathBuf,
    buildvrt: PathBuf,
}

impl Default for GdalTools {
    fn default() -> Self {
        Self {
            translate: PathBuf::from("gdal_translate"),
            buildvrt: PathBuf::from("gdalbuildvrt"),
        }
    }
}

impl GdalTools {
    /// Uses the utilities found in `bin_dir` instead of relying on `PATH`.
    pub fn in_directory(bin_dir: &Path) -> Self {
        Self {
            translate: bin_dir.join("gdal_translate"),
            buildvrt: bin_dir.join("gdalbuildvrt"),
        }
    }

    pub fn translate_args(
        image: &Path,
        bounds: &TileBounds,
        projection: &str,
        output: &Path,
    ) -> Vec<String> {
        vec![
            "-a_srs".to_string(),
            projection.to_string(),
            "-a_ullr".to_string(),
            bounds.upper_left.x.to_string(),
            bounds.upper_left.y.to_string(),
            bounds.lower_right.x.to_string(),
            bounds.lower_right.y.to_string(),
            "-of".to_string(),
            "GTiff".to_string(),
            image.display().to_string(),
            output.display().to_string(),
        ]
    }
}

impl RasterTool for GdalTools {
    fn georeference(
        &self,
        image: &Path,
        bounds: &TileBounds,
        projection: &str,
        output: &Path,
    ) -> Result<PathBuf> {
        let result = Command::new(&self.translate)
            .args(Self::translate_args(image, bounds, projection, output))
            .output();
        check_output(result).map_err(|reason| MosaicError::Georeference {
            path: image.to_path_buf(),
            reason,
        })?;
        Ok(output.to_path_buf())
    }

    fn build_mosaic(&self, tiles: &[PathBuf], output: &Path) -> Result<PathBuf> {
        let list_path = output.with_extension("txt");
        let listing = tiles
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        fs::write(&list_path, listing).map_err(|err| MosaicError::io(&list_path, err))?;

        let result = Command::new(&self.buildvrt)
            .arg("-input_file_list")
            .arg(&list_path)
            .arg(output)
            .output();
        check_output(result).map_err(MosaicError::Mosaic)?;
        Ok(output.to_path_buf())
    }
}

fn check_output(result: std::io::Result<Output>) -> std::result::Result<(), String> {
    let output = result.map_err(|err| format!("could not run command: {err}"))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(format!("{} ({})", stderr.trim(), output.status))
}

/// Georeferences every fetched tile, then merges them into the workspace mosaic.
pub fn assemble_mosaic<R: RasterTool + ?Sized>(
    tool: &R,
    tiles: &[FetchedTile],
    projection: &str,
    workspace: &TileWorkspace,
) -> Result<PathBuf> {
    if tiles.is_empty() {
        return Err(MosaicError::Mosaic(
            "no tiles overlap the requested area".to_string(),
        ));
    }
    let geotiffs = tiles
        .iter()
        .map(|tile| {
            tool.georeference(
                &tile.image_path,
                &tile.bounds,
                projection,
                &workspace.geotiff_path(&tile.index),
            )
        })
        .collect::<Result<Vec<_>>>()?;
    tool.build_mosaic(&geotiffs, &workspace.mosaic_path())
}
