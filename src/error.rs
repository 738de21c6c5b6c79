//! Error types for tile retrieval and mosaic assembly.

use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

use crate::grid::TileIndex;

pub type Result<T> = std::result::Result<T, MosaicError>;

/// Errors raised while planning, fetching or assembling a mosaic.
#[derive(Debug, Error)]
pub enum MosaicError {
    /// Missing or invalid settings, or a service that is not a tile pyramid.
    /// Always raised before any tile is requested.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A single tile could not be retrieved or stored. Aborts the retrieval.
    #[error("failed to fetch tile {tile} from {location}: {cause}")]
    Fetch {
        tile: TileIndex,
        location: String,
        #[source]
        cause: FetchCause,
    },

    /// The caller raised the cancel flag before every tile was saved.
    #[error("tile retrieval cancelled")]
    Cancelled,

    #[error("failed to georeference {}: {reason}", .path.display())]
    Georeference { path: PathBuf, reason: String },

    #[error("failed to build mosaic: {0}")]
    Mosaic(String),

    #[error("reprojection failed: {0}")]
    Projection(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a tile request failed.
#[derive(Debug, Error)]
pub enum FetchCause {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned status {0}")]
    Status(StatusCode),

    #[error("server returned an empty body")]
    EmptyBody,

    #[error("could not store tile at {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl FetchCause {
    /// Network-level failures, 5xx responses and 429 are retried.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchCause::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            FetchCause::Status(status) => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            FetchCause::EmptyBody | FetchCause::Storage { .. } | FetchCause::Other(_) => false,
        }
    }
}

impl MosaicError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MosaicError::Io {
            path: path.into(),
            source,
        }
    }
}
