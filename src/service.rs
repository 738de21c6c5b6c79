use std::thread;
use std::time::Duration;

use geo_types::Coord;
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::error::{FetchCause, MosaicError, Result};
use crate::grid::TileAddress;
use crate::pyramid::{LevelOfDetail, RowOrigin, TilePyramidDescriptor, TileSize};

pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 30;
const USER_AGENT: &str = "tilemosaic/1.0";
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// What a tile service tells us about itself.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceDescription {
    pub pyramid: TilePyramidDescriptor,
    /// CRS of the tile grid, as `EPSG:<code>` or WKT.
    pub projection: String,
}

/// A source of pre-rendered tiles.
pub trait TileService: Sync {
    fn describe(&self) -> Result<ServiceDescription>;

    fn fetch_tile(&self, address: &TileAddress) -> std::result::Result<Vec<u8>, FetchCause>;

    /// Human-readable location of a tile, used in error messages.
    fn locate(&self, address: &TileAddress) -> String {
        address.relative_path()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ServiceOptions {
    pub timeout: Duration,
    /// Ask the server for a filler image where it has no data instead of an error.
    pub blank_tiles: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECONDS),
            blank_tiles: true,
        }
    }
}

/// ArcGIS REST MapServer or ImageServer endpoint.
pub struct ArcGisService {
    base_url: String,
    client: Client,
    options: ServiceOptions,
}

impl ArcGisService {
    pub fn connect(url: &str, options: ServiceOptions) -> Result<Self> {
        let base_url = url.trim().trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(MosaicError::Configuration(format!(
                "service URL must be http(s): {url}"
            )));
        }
        let client = Client::builder()
            .timeout(options.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| {
                MosaicError::Configuration(format!("failed to build HTTP client: {err}"))
            })?;
        Ok(Self {
            base_url,
            client,
            options,
        })
    }

    pub fn url(&self) -> &str {
        &self.base_url
    }

    fn tile_url(&self, address: &TileAddress) -> String {
        let mut url = format!("{}/{}", self.base_url, address.relative_path());
        if self.options.blank_tiles {
            url.push_str("?blankTile=true");
        }
        url
    }
}

impl TileService for ArcGisService {
    fn describe(&self) -> Result<ServiceDescription> {
        let url = format!("{}?f=json", self.base_url);
        let response = self.client.get(&url).send().map_err(|err| {
            MosaicError::Configuration(format!("failed to query service metadata at {url}: {err}"))
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(MosaicError::Configuration(format!(
                "service metadata request to {url} returned status {status}"
            )));
        }
        let body = response.text().map_err(|err| {
            MosaicError::Configuration(format!("failed to read service metadata from {url}: {err}"))
        })?;
        parse_service_metadata(&body, &self.base_url)
    }

    fn fetch_tile(&self, address: &TileAddress) -> std::result::Result<Vec<u8>, FetchCause> {
        let response = self.client.get(self.tile_url(address)).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchCause::Status(status));
        }
        let body = response.bytes()?;
        if body.is_empty() {
            return Err(FetchCause::EmptyBody);
        }
        Ok(body.to_vec())
    }

    fn locate(&self, address: &TileAddress) -> String {
        self.tile_url(address)
    }
}

/// Retries transient tile failures. Retrying is a policy around a service,
/// never something the fetch orchestrator does on its own.
pub struct RetryingService<S> {
    inner: S,
    retries: usize,
    backoff: Duration,
}

impl<S: TileService> RetryingService<S> {
    pub fn new(inner: S, retries: usize) -> Self {
        Self {
            inner,
            retries,
            backoff: RETRY_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: TileService> TileService for RetryingService<S> {
    fn describe(&self) -> Result<ServiceDescription> {
        self.inner.describe()
    }

    fn fetch_tile(&self, address: &TileAddress) -> std::result::Result<Vec<u8>, FetchCause> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inner.fetch_tile(address) {
                Ok(bytes) => return Ok(bytes),
                Err(cause) if cause.is_transient() && attempt <= self.retries => {
                    thread::sleep(self.backoff * attempt as u32);
                }
                Err(cause) => return Err(cause),
            }
        }
    }

    fn locate(&self, address: &TileAddress) -> String {
        self.inner.locate(address)
    }
}

#[derive(Debug, Deserialize)]
struct ServiceMetadata {
    #[serde(rename = "tileInfo")]
    tile_info: Option<TileInfo>,
    #[serde(rename = "spatialReference")]
    spatial_reference: Option<SpatialReference>,
    error: Option<ServiceErrorBody>,
}

#[derive(Debug, Deserialize)]
struct TileInfo {
    rows: Option<u32>,
    cols: Option<u32>,
    origin: Option<Origin>,
    #[serde(default)]
    lods: Vec<Lod>,
    #[serde(rename = "spatialReference")]
    spatial_reference: Option<SpatialReference>,
}

#[derive(Debug, Deserialize)]
struct Origin {
    x: f64,
    y: f64,
}

#[derive(Debug, Deserialize)]
struct Lod {
    level: u32,
    resolution: f64,
}

#[derive(Debug, Deserialize)]
struct SpatialReference {
    wkid: Option<u32>,
    #[serde(rename = "latestWkid")]
    latest_wkid: Option<u32>,
    wkt: Option<String>,
}

impl SpatialReference {
    fn to_projection(&self) -> Option<String> {
        self.latest_wkid
            .or(self.wkid)
            .map(projection_for_wkid)
            .or_else(|| self.wkt.clone())
    }
}

/// Esri's legacy Web Mercator codes are EPSG:3857; other codes Esri defined
/// itself live under the `ESRI` authority.
fn projection_for_wkid(code: u32) -> String {
    match code {
        102100 | 102113 | 900913 | 3785 => "EPSG:3857".to_string(),
        53000..=54999 | 100000..=199999 => format!("ESRI:{code}"),
        _ => format!("EPSG:{code}"),
    }
}

#[derive(Debug, Deserialize)]
struct ServiceErrorBody {
    code: Option<i64>,
    message: Option<String>,
}

/// Maps ArcGIS service JSON into a typed description.
pub fn parse_service_metadata(body: &str, url: &str) -> Result<ServiceDescription> {
    let metadata: ServiceMetadata = serde_json::from_str(body).map_err(|err| {
        MosaicError::Configuration(format!("invalid service metadata from {url}: {err}"))
    })?;
    if let Some(error) = metadata.error {
        return Err(MosaicError::Configuration(format!(
            "service at {url} returned error {}: {}",
            error.code.map(|c| c.to_string()).unwrap_or_else(|| "?".to_string()),
            error.message.unwrap_or_default()
        )));
    }
    let tile_info = metadata.tile_info.ok_or_else(|| {
        MosaicError::Configuration(format!("not a tiled map or image server: {url}"))
    })?;
    let missing = |field: &str| {
        MosaicError::Configuration(format!("service metadata from {url} is missing tileInfo.{field}"))
    };
    let cols = tile_info.cols.ok_or_else(|| missing("cols"))?;
    let rows = tile_info.rows.ok_or_else(|| missing("rows"))?;
    let origin = tile_info.origin.ok_or_else(|| missing("origin"))?;
    if tile_info.lods.is_empty() {
        return Err(MosaicError::Configuration(format!(
            "not a tiled map or image server: {url} (no levels of detail)"
        )));
    }
    let projection = tile_info
        .spatial_reference
        .as_ref()
        .or(metadata.spatial_reference.as_ref())
        .and_then(SpatialReference::to_projection)
        .ok_or_else(|| {
            MosaicError::Configuration(format!("service at {url} has no spatial reference"))
        })?;
    let levels = tile_info
        .lods
        .iter()
        .map(|lod| LevelOfDetail {
            id: lod.level,
            resolution: lod.resolution,
        })
        .collect();
    let pyramid = TilePyramidDescriptor::new(
        levels,
        Coord {
            x: origin.x,
            y: origin.y,
        },
        TileSize { cols, rows },
        RowOrigin::Top,
    )?;
    Ok(ServiceDescription {
        pyramid,
        projection,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use reqwest::StatusCode;

    use super::*;

    const WEB_MERCATOR: &str = r#"{
        "currentVersion": 10.81,
        "spatialReference": {"wkid": 102100, "latestWkid": 3857},
        "tileInfo": {
            "rows": 256,
            "cols": 256,
            "dpi": 96,
            "format": "JPEG",
            "origin": {"x": -20037508.342787, "y": 20037508.342787},
            "spatialReference": {"wkid": 102100, "latestWkid": 3857},
            "lods": [
                {"level": 0, "resolution": 156543.03392800014, "scale": 5.91657527591555E8},
                {"level": 1, "resolution": 78271.51696399994, "scale": 2.95828763795777E8},
                {"level": 2, "resolution": 39135.75848200009, "scale": 1.47914381897889E8}
            ]
        }
    }"#;

    #[test]
    fn parses_tiled_service() {
        let description = parse_service_metadata(WEB_MERCATOR, "https://example.test/MapServer").unwrap();
        assert_eq!(description.projection, "EPSG:3857");
        let pyramid = description.pyramid;
        assert_eq!(pyramid.tile_size(), TileSize { cols: 256, rows: 256 });
        assert_eq!(pyramid.levels().len(), 3);
        assert_eq!(pyramid.levels()[2].id, 2);
        assert_eq!(pyramid.origin().x, -20037508.342787);
        assert_eq!(pyramid.row_origin(), RowOrigin::Top);
    }

    #[test]
    fn falls_back_to_wkt() {
        let body = r#"{
            "tileInfo": {
                "rows": 512, "cols": 512,
                "origin": {"x": 0, "y": 0},
                "spatialReference": {"wkt": "PROJCS[\"local\"]"},
                "lods": [{"level": 0, "resolution": 1.0}]
            }
        }"#;
        let description = parse_service_metadata(body, "u").unwrap();
        assert_eq!(description.projection, "PROJCS[\"local\"]");
    }

    #[test]
    fn esri_wkids_map_to_proj_authorities() {
        assert_eq!(projection_for_wkid(102100), "EPSG:3857");
        assert_eq!(projection_for_wkid(102113), "EPSG:3857");
        assert_eq!(projection_for_wkid(102022), "ESRI:102022");
        assert_eq!(projection_for_wkid(54009), "ESRI:54009");
        assert_eq!(projection_for_wkid(28356), "EPSG:28356");

        let body = WEB_MERCATOR.replace(r#", "latestWkid": 3857"#, "");
        let description = parse_service_metadata(&body, "https://example.test/MapServer").unwrap();
        assert_eq!(description.projection, "EPSG:3857");
    }

    #[test]
    fn dynamic_service_is_rejected() {
        let body = r#"{"spatialReference": {"wkid": 4326}, "singleFusedMapCache": false}"#;
        let err = parse_service_metadata(body, "https://example.test/MapServer").unwrap_err();
        match err {
            MosaicError::Configuration(message) => {
                assert!(message.contains("not a tiled map or image server"))
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn missing_origin_is_rejected() {
        let body = r#"{"tileInfo": {"rows": 256, "cols": 256, "lods": [{"level": 0, "resolution": 1.0}]},
                       "spatialReference": {"wkid": 3857}}"#;
        let err = parse_service_metadata(body, "u").unwrap_err();
        assert!(err.to_string().contains("tileInfo.origin"));
    }

    #[test]
    fn arcgis_error_object_is_reported() {
        let body = r#"{"error": {"code": 499, "message": "Token Required", "details": []}}"#;
        let err = parse_service_metadata(body, "u").unwrap_err();
        assert!(err.to_string().contains("499"));
        assert!(err.to_string().contains("Token Required"));
    }

    struct Flaky {
        failures: usize,
        status: StatusCode,
        calls: AtomicUsize,
    }

    impl TileService for Flaky {
        fn describe(&self) -> Result<ServiceDescription> {
            Err(MosaicError::Configuration("unused".to_string()))
        }

        fn fetch_tile(&self, _address: &TileAddress) -> std::result::Result<Vec<u8>, FetchCause> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(FetchCause::Status(self.status))
            } else {
                Ok(vec![1, 2, 3])
            }
        }
    }

    fn address() -> TileAddress {
        TileAddress {
            level: 0,
            row: 0,
            col: 0,
        }
    }

    #[test]
    fn retries_transient_failures() {
        let service = RetryingService::new(
            Flaky {
                failures: 2,
                status: StatusCode::SERVICE_UNAVAILABLE,
                calls: AtomicUsize::new(0),
            },
            2,
        )
        .with_backoff(Duration::ZERO);
        assert_eq!(service.fetch_tile(&address()).unwrap(), vec![1, 2, 3]);
        assert_eq!(service.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn gives_up_after_retry_budget() {
        let service = RetryingService::new(
            Flaky {
                failures: 5,
                status: StatusCode::BAD_GATEWAY,
                calls: AtomicUsize::new(0),
            },
            1,
        )
        .with_backoff(Duration::ZERO);
        assert!(matches!(
            service.fetch_tile(&address()),
            Err(FetchCause::Status(StatusCode::BAD_GATEWAY))
        ));
        assert_eq!(service.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn does_not_retry_client_errors() {
        let service = RetryingService::new(
            Flaky {
                failures: 1,
                status: StatusCode::NOT_FOUND,
                calls: AtomicUsize::new(0),
            },
            3,
        )
        .with_backoff(Duration::ZERO);
        assert!(service.fetch_tile(&address()).is_err());
        assert_eq!(service.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rejects_non_http_url() {
        assert!(matches!(
            ArcGisService::connect("ftp://example.test", ServiceOptions::default()),
            Err(MosaicError::Configuration(_))
        ));
    }
}
