//! Tile retrieval.
//!
//! Every candidate tile goes through `Pending → Requested → Saved | Failed`.
//! A failed tile aborts the whole retrieval: the first failure is kept, no
//! further requests start, and the failure is returned once in-flight
//! requests have settled. The abort is local to one `fetch_all` call; the
//! caller's cancel flag is only ever read.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rayon::ThreadPoolBuilder;
use rayon::prelude::*;

use crate::error::{FetchCause, MosaicError, Result};
use crate::grid::{CandidateTile, TileBounds, TileIndex};
use crate::pyramid::RowOrigin;
use crate::service::TileService;
use crate::workspace::TileWorkspace;

pub const DEFAULT_WORKERS: usize = 4;
const FALLBACK_EXTENSION: &str = "img";

/// A tile image saved to disk.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchedTile {
    pub index: TileIndex,
    pub bounds: TileBounds,
    pub image_path: PathBuf,
}

/// Reported after each tile, whether it was downloaded or found in the cache.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FetchProgress {
    pub completed: usize,
    pub total: usize,
    pub tile: TileIndex,
    pub cached: bool,
}

type ProgressCallback<'a> = Box<dyn Fn(FetchProgress) + Send + Sync + 'a>;

pub struct FetchOrchestrator<'a> {
    workspace: &'a TileWorkspace,
    workers: usize,
    progress: Option<ProgressCallback<'a>>,
    cancel: Arc<AtomicBool>,
}

impl<'a> FetchOrchestrator<'a> {
    pub fn new(workspace: &'a TileWorkspace) -> Self {
        Self {
            workspace,
            workers: DEFAULT_WORKERS,
            progress: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of concurrent requests. `0` and `1` both fetch sequentially.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn on_progress(mut self, callback: impl Fn(FetchProgress) + Send + Sync + 'a) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Shares a cancel flag with the caller. Raising it stops new requests.
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub fn workspace(&self) -> &TileWorkspace {
        self.workspace
    }

    /// Fetches every tile, returning them in input order. `row_origin` is the
    /// service's row numbering convention.
    pub fn fetch_all<S: TileService + ?Sized>(
        &self,
        service: &S,
        row_origin: RowOrigin,
        tiles: &[CandidateTile],
    ) -> Result<Vec<FetchedTile>> {
        let run = FetchRun {
            orchestrator: self,
            row_origin,
            total: tiles.len(),
            completed: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
            first_failure: Mutex::new(None),
        };

        let fetched: Vec<Option<FetchedTile>> = if self.workers <= 1 {
            tiles.iter().map(|tile| run.fetch(service, tile)).collect()
        } else {
            let pool = ThreadPoolBuilder::new()
                .num_threads(self.workers)
                .thread_name(|i| format!("tile-fetch-{i}"))
                .build()
                .map_err(|err| {
                    MosaicError::Configuration(format!("failed to start fetch workers: {err}"))
                })?;
            pool.install(|| {
                tiles
                    .par_iter()
                    .map(|tile| run.fetch(service, tile))
                    .collect()
            })
        };

        if let Some(failure) = run.take_failure() {
            return Err(failure);
        }
        fetched
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(MosaicError::Cancelled)
    }
}

struct FetchRun<'o, 'a> {
    orchestrator: &'o FetchOrchestrator<'a>,
    row_origin: RowOrigin,
    total: usize,
    completed: AtomicUsize,
    aborted: AtomicBool,
    first_failure: Mutex<Option<MosaicError>>,
}

impl FetchRun<'_, '_> {
    /// `None` when the tile was skipped because the run is cancelled or failed.
    fn fetch<S: TileService + ?Sized>(&self, service: &S, tile: &CandidateTile) -> Option<FetchedTile> {
        if self.aborted.load(Ordering::SeqCst) || self.orchestrator.cancel.load(Ordering::SeqCst) {
            return None;
        }
        match self.fetch_one(service, tile) {
            Ok((fetched, cached)) => {
                let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(callback) = &self.orchestrator.progress {
                    callback(FetchProgress {
                        completed,
                        total: self.total,
                        tile: tile.index,
                        cached,
                    });
                }
                Some(fetched)
            }
            Err(err) => {
                self.record_failure(err);
                None
            }
        }
    }

    fn fetch_one<S: TileService + ?Sized>(
        &self,
        service: &S,
        tile: &CandidateTile,
    ) -> Result<(FetchedTile, bool)> {
        let workspace = self.orchestrator.workspace;
        if let Some(image_path) = workspace.cached_tile(&tile.index) {
            return Ok((saved(tile, image_path), true));
        }

        let address = tile.index.address(self.row_origin);
        let fail = |cause: FetchCause| MosaicError::Fetch {
            tile: tile.index,
            location: service.locate(&address),
            cause,
        };
        let bytes = service.fetch_tile(&address).map_err(fail)?;
        let image_path = workspace.raw_tile_path(&tile.index, extension_for(&bytes));
        store(&workspace.partial_tile_path(&tile.index), &image_path, &bytes).map_err(fail)?;
        Ok((saved(tile, image_path), false))
    }

    fn record_failure(&self, err: MosaicError) {
        self.aborted.store(true, Ordering::SeqCst);
        let mut slot = match self.first_failure.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn take_failure(&self) -> Option<MosaicError> {
        match self.first_failure.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

fn saved(tile: &CandidateTile, image_path: PathBuf) -> FetchedTile {
    FetchedTile {
        index: tile.index,
        bounds: tile.bounds,
        image_path,
    }
}

/// Writes under a temporary name so an interrupted write never leaves a file
/// that looks complete.
fn store(partial: &Path, target: &Path, bytes: &[u8]) -> std::result::Result<(), FetchCause> {
    let result = fs::write(partial, bytes).and_then(|()| fs::rename(partial, target));
    result.map_err(|source| {
        let _ = fs::remove_file(partial);
        FetchCause::Storage {
            path: target.to_path_buf(),
            source,
        }
    })
}

fn extension_for(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or(FALLBACK_EXTENSION)
}
