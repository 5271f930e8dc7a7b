//! Validated, immutable search queries for the catalogue's OpenSearch endpoint.
use crate::error::ValidationError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;
use url::Url;

pub const DEFAULT_CLOUD_COVER: CloudCover = CloudCover {
    low: 0.0,
    high: 5.0,
};
pub const DEFAULT_MAX_RECORDS: u32 = 20;
pub const MAX_RECORDS_LIMIT: u32 = 2000;

/// Raw search filters as they appear in the configuration file. Every field is optional; the
/// [`QueryBuilder`] decides which defaults apply and rejects contradictory combinations.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Filters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_cover: Option<[f64; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<String>,
    #[serde(rename = "box", skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_records: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_param: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Sentinel1,
    Sentinel2,
    Sentinel3,
    Sentinel5P,
}

impl Collection {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Sentinel1 => "Sentinel1",
            Self::Sentinel2 => "Sentinel2",
            Self::Sentinel3 => "Sentinel3",
            Self::Sentinel5P => "Sentinel5P",
        }
    }

    pub fn search_url(&self, catalog_url: &Url) -> Url {
        collection_url(catalog_url, self, "search.json")
    }

    /// Queryable-parameter schema for the collection.
    pub fn describe_url(&self, catalog_url: &Url) -> Url {
        collection_url(catalog_url, self, "describe.xml")
    }
}

fn collection_url(catalog_url: &Url, collection: &Collection, leaf: &str) -> Url {
    let mut url = catalog_url.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments
            .pop_if_empty()
            .extend(["collections", collection.key(), leaf]);
    }
    url
}

impl FromStr for Collection {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "sentinel1" => Ok(Self::Sentinel1),
            "sentinel2" => Ok(Self::Sentinel2),
            "sentinel3" => Ok(Self::Sentinel3),
            "sentinel5p" => Ok(Self::Sentinel5P),
            _ => Err(ValidationError::UnknownCollection(s.to_string())),
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloudCover {
    pub low: f64,
    pub high: f64,
}

impl CloudCover {
    pub fn new(low: f64, high: f64) -> Result<Self, ValidationError> {
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if !in_range(low) || !in_range(high) || low > high {
            return Err(ValidationError::CloudCover { low, high });
        }
        Ok(Self { low, high })
    }
}

impl fmt::Display for CloudCover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.low, self.high)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub completion: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new(
        start: Option<DateTime<Utc>>,
        completion: Option<DateTime<Utc>>,
    ) -> Result<Self, ValidationError> {
        if let (Some(s), Some(c)) = (start, completion) {
            if s > c {
                return Err(ValidationError::DateOrder {
                    start: format_timestamp(&s),
                    completion: format_timestamp(&c),
                });
            }
        }
        Ok(Self { start, completion })
    }
}

fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(key: &'static str, value: &str) -> Result<DateTime<Utc>, ValidationError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ValidationError::Date {
            key,
            value: value.to_string(),
        })
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpatialFilter {
    Point {
        lon: f64,
        lat: f64,
        /// Metres around the point.
        radius: Option<f64>,
    },
    /// WKT `POINT(...)` or `POLYGON((...))` in EPSG:4326.
    Geometry(String),
    BoundingBox {
        west: f64,
        south: f64,
        east: f64,
        north: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortParam {
    #[default]
    StartDate,
    CompletionDate,
    Published,
}

impl SortParam {
    pub fn key(&self) -> &'static str {
        match self {
            Self::StartDate => "startDate",
            Self::CompletionDate => "completionDate",
            Self::Published => "published",
        }
    }
}

impl FromStr for SortParam {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "startDate" => Ok(Self::StartDate),
            "completionDate" => Ok(Self::CompletionDate),
            "published" => Ok(Self::Published),
            other => Err(ValidationError::SortParam(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Ascending => "ascending",
            Self::Descending => "descending",
        }
    }
}

impl FromStr for SortOrder {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ascending" => Ok(Self::Ascending),
            "descending" => Ok(Self::Descending),
            other => Err(ValidationError::SortOrder(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub collection: Collection,
    pub cloud_cover: CloudCover,
    pub dates: DateRange,
    pub spatial: Option<SpatialFilter>,
    pub product_type: Option<String>,
    pub sort_param: SortParam,
    pub sort_order: SortOrder,
    pub max_records: u32,
    pub page: u32,
}

impl SearchQuery {
    /// Request parameters in the order the catalogue documents them.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("cloudCover", self.cloud_cover.to_string())];
        if let Some(start) = &self.dates.start {
            params.push(("startDate", format_timestamp(start)));
        }
        if let Some(completion) = &self.dates.completion {
            params.push(("completionDate", format_timestamp(completion)));
        }
        match &self.spatial {
            Some(SpatialFilter::Point { lon, lat, radius }) => {
                params.push(("lon", lon.to_string()));
                params.push(("lat", lat.to_string()));
                if let Some(radius) = radius {
                    params.push(("radius", radius.to_string()));
                }
            }
            Some(SpatialFilter::Geometry(wkt)) => params.push(("geometry", wkt.clone())),
            Some(SpatialFilter::BoundingBox {
                west,
                south,
                east,
                north,
            }) => params.push(("box", format!("{west},{south},{east},{north}"))),
            None => {}
        }
        if let Some(product_type) = &self.product_type {
            params.push(("productType", product_type.clone()));
        }
        params.push(("sortParam", self.sort_param.key().to_string()));
        params.push(("sortOrder", self.sort_order.key().to_string()));
        params.push(("maxRecords", self.max_records.to_string()));
        params.push(("page", self.page.to_string()));
        params
    }

    pub fn search_url(&self, catalog_url: &Url) -> Url {
        let mut url = self.collection.search_url(catalog_url);
        url.query_pairs_mut().extend_pairs(self.params());
        url
    }
}

/// A default the builder applied because a key was missing.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigWarning {
    pub key: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub query: SearchQuery,
    pub warnings: Vec<ConfigWarning>,
}

pub struct QueryBuilder;

impl QueryBuilder {
    pub fn build(filters: &Filters) -> Result<BuiltQuery, ValidationError> {
        let mut warnings = vec![];

        let collection = match &filters.collection {
            Some(name) => name.parse::<Collection>()?,
            None => {
                warnings.push(ConfigWarning {
                    key: "collection",
                    message: "not set, defaulting to Sentinel2".to_string(),
                });
                Collection::Sentinel2
            }
        };

        let cloud_cover = match filters.cloud_cover {
            Some([low, high]) => CloudCover::new(low, high)?,
            None => {
                warnings.push(ConfigWarning {
                    key: "cloudCover",
                    message: format!("not set, defaulting to {DEFAULT_CLOUD_COVER}"),
                });
                DEFAULT_CLOUD_COVER
            }
        };

        let start = filters
            .start_date
            .as_deref()
            .map(|v| parse_timestamp("startDate", v))
            .transpose()?;
        let completion = filters
            .completion_date
            .as_deref()
            .map(|v| parse_timestamp("completionDate", v))
            .transpose()?;
        let dates = DateRange::new(start, completion)?;

        let spatial = Self::spatial(filters)?;

        let sort_param = filters
            .sort_param
            .as_deref()
            .map(str::parse::<SortParam>)
            .transpose()?
            .unwrap_or_default();
        let sort_order = filters
            .sort_order
            .as_deref()
            .map(str::parse::<SortOrder>)
            .transpose()?
            .unwrap_or_default();

        let max_records = filters.max_records.unwrap_or(DEFAULT_MAX_RECORDS);
        if max_records == 0 || max_records > MAX_RECORDS_LIMIT {
            return Err(ValidationError::MaxRecords {
                value: max_records,
                max: MAX_RECORDS_LIMIT,
            });
        }
        let page = filters.page.unwrap_or(1);
        if page == 0 {
            return Err(ValidationError::Page);
        }

        for warning in &warnings {
            warn!("{warning}");
        }

        Ok(BuiltQuery {
            query: SearchQuery {
                collection,
                cloud_cover,
                dates,
                spatial,
                product_type: filters.product_type.clone(),
                sort_param,
                sort_order,
                max_records,
                page,
            },
            warnings,
        })
    }

    fn spatial(filters: &Filters) -> Result<Option<SpatialFilter>, ValidationError> {
        let mut present = vec![];
        if filters.lon.is_some() || filters.lat.is_some() {
            present.push("lon/lat");
        }
        if filters.geometry.is_some() {
            present.push("geometry");
        }
        if filters.bbox.is_some() {
            present.push("box");
        }
        if present.len() > 1 {
            return Err(ValidationError::ConflictingSpatialFilters(present));
        }
        if filters.radius.is_some() && filters.lon.is_none() && filters.lat.is_none() {
            return Err(ValidationError::RadiusWithoutPoint);
        }

        if let Some(geometry) = &filters.geometry {
            let geometry = geometry.trim();
            if geometry.is_empty() {
                return Err(ValidationError::EmptyGeometry);
            }
            return Ok(Some(SpatialFilter::Geometry(geometry.to_string())));
        }
        if let Some([west, south, east, north]) = filters.bbox {
            check_lon("box.west", west)?;
            check_lat("box.south", south)?;
            check_lon("box.east", east)?;
            check_lat("box.north", north)?;
            return Ok(Some(SpatialFilter::BoundingBox {
                west,
                south,
                east,
                north,
            }));
        }
        match (filters.lon, filters.lat) {
            (Some(lon), Some(lat)) => {
                check_lon("lon", lon)?;
                check_lat("lat", lat)?;
                if let Some(radius) = filters.radius {
                    if radius.is_nan() || radius <= 0.0 {
                        return Err(ValidationError::Coordinate {
                            key: "radius",
                            value: radius,
                        });
                    }
                }
                Ok(Some(SpatialFilter::Point {
                    lon,
                    lat,
                    radius: filters.radius,
                }))
            }
            (None, None) => Ok(None),
            _ => Err(ValidationError::IncompletePoint),
        }
    }
}

fn check_lon(key: &'static str, value: f64) -> Result<(), ValidationError> {
    if (-180.0..=180.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::Coordinate { key, value })
    }
}

fn check_lat(key: &'static str, value: f64) -> Result<(), ValidationError> {
    if (-90.0..=90.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::Coordinate { key, value })
    }
}
