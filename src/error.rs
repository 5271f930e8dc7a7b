use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MapError {
    #[error("Unable to clone request")]
    Clone,
}

/// Failures reading or parsing the configuration file itself. Missing filter keys are not
/// errors, they become [`crate::query::ConfigWarning`]s.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Unable to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Unable to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Unable to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid setting '{key}': {reason}")]
    Setting { key: &'static str, reason: String },
}

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),
    #[error("cloudCover bounds must satisfy 0 <= low <= high <= 100, got [{low},{high}]")]
    CloudCover { low: f64, high: f64 },
    #[error("Unable to parse {key} as an ISO-8601 UTC timestamp: {value}")]
    Date { key: &'static str, value: String },
    #[error("startDate {start} is after completionDate {completion}")]
    DateOrder { start: String, completion: String },
    #[error("geometry must not be empty")]
    EmptyGeometry,
    #[error("Only one spatial filter may be set, found: {}", .0.join(", "))]
    ConflictingSpatialFilters(Vec<&'static str>),
    #[error("lon and lat must be given together")]
    IncompletePoint,
    #[error("radius requires lon and lat")]
    RadiusWithoutPoint,
    #[error("{key} out of range: {value}")]
    Coordinate { key: &'static str, value: f64 },
    #[error("Unknown sortParam: {0} (expected startDate, completionDate or published)")]
    SortParam(String),
    #[error("Unknown sortOrder: {0} (expected ascending or descending)")]
    SortOrder(String),
    #[error("maxRecords must be between 1 and {max}, got {value}")]
    MaxRecords { value: u32, max: u32 },
    #[error("page is 1-indexed, got 0")]
    Page,
}

/// Failures below the HTTP status level: the request never produced a response.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Request interrupted: {0}")]
    Interrupted(String),
    #[error("Request failed: {0}")]
    Other(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connect(_) | Self::Interrupted(_)
        )
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        if err.is_timeout() {
            Self::Timeout(message)
        } else if err.is_connect() {
            Self::Connect(message)
        } else if err.is_request() || err.is_body() {
            Self::Interrupted(message)
        } else {
            Self::Other(message)
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("No credentials available (set username/password in the config or DS_USER/DS_PASS)")]
    MissingCredentials,
    #[error("No token has been acquired")]
    NotAuthenticated,
    #[error("Token has been invalidated, acquire a new one")]
    Invalidated,
    #[error("Token request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Identity service unavailable ({status}): {body}")]
    Unavailable { status: u16, body: String },
    #[error("Unexpected token response: {0}")]
    MalformedResponse(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Catalogue returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Unable to decode search response from {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("Pagination stalled: next link {0} revisits an earlier page")]
    Pagination(String),
    #[error("Invalid link in search response: {0}")]
    InvalidLink(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetadataError {
    #[error("Unable to parse metadata document: {0}")]
    Xml(String),
    #[error("Metadata element not found: {0}")]
    MissingElement(String),
    #[error("Attribute '{0}' missing from Granule element")]
    MissingAttribute(&'static str),
    #[error("Attribute '{attribute}' has an unexpected format: {value}")]
    MalformedIdentifier {
        attribute: &'static str,
        value: String,
    },
    #[error("Unable to locate product storage path: {0}")]
    StoragePath(String),
    #[error("Product has no catalogue id")]
    MissingProductId,
    #[error(transparent)]
    Title(#[from] PathError),
    #[error("Unable to fetch metadata: {0}")]
    Fetch(String),
    #[error("Metadata request returned {status}")]
    Status { status: u16 },
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PathError {
    #[error("Product title too short or not ASCII: {0}")]
    MalformedTitle(String),
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Nothing to transfer")]
    Empty,
    #[error("Unable to write include list: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to launch {binary}: {reason}")]
    Spawn { binary: String, reason: String },
    #[error("Transfer exited with status {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
    #[error("Unable to encode transfer plan: {0}")]
    Plan(#[from] serde_json::Error),
}
