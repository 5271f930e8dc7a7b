//! Canonical granule subdirectory names, e.g. `L2A_T08VPH_A046314_20240504T195929`.
use crate::catalog::ProductRecord;
use crate::copernicus::ProductMetadata;
use crate::error::PathError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

// Offsets into titles such as `S2A_MSIL2A_20240504T195901_N0510_R128_T08VPH_20240505T015750.SAFE`
const LEVEL: Range<usize> = 4..10;
const ACQUISITION_DATE: Range<usize> = 11..26;
const TILE: Range<usize> = 38..44;

const PREFIX: &str = "L2A";

/// Fixed-width fields of a product title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductTitle<'a> {
    pub level: &'a str,
    pub acquisition_date: &'a str,
    pub tile: &'a str,
}

impl<'a> ProductTitle<'a> {
    pub fn parse(title: &'a str) -> Result<Self, PathError> {
        let field = |range: Range<usize>| {
            title
                .get(range)
                .filter(|s| s.is_ascii())
                .ok_or_else(|| PathError::MalformedTitle(title.to_string()))
        };
        Ok(Self {
            level: field(LEVEL)?,
            acquisition_date: field(ACQUISITION_DATE)?,
            tile: field(TILE)?,
        })
    }

    /// Name of the product metadata document, e.g. `MTD_MSIL2A.xml`.
    pub fn metadata_file_name(&self) -> String {
        format!("MTD_{}.xml", self.level)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubdirectoryName(String);

impl SubdirectoryName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubdirectoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SubdirectoryName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn build(
    product: &ProductRecord,
    metadata: &ProductMetadata,
) -> Result<SubdirectoryName, PathError> {
    let title = ProductTitle::parse(&product.title)?;
    Ok(SubdirectoryName(format!(
        "{PREFIX}_{}_{}_{}",
        title.tile, metadata.granule, metadata.datastrip
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TITLE: &str = "S2A_MSIL2A_20240504T195901_N0510_R128_T08VPH_20240505T015750.SAFE";

    fn record(title: &str) -> ProductRecord {
        ProductRecord {
            id: Some("a1b2".to_string()),
            title: title.to_string(),
            product_identifier: format!("/eodata/Sentinel-2/MSI/L2A/2024/05/04/{title}"),
            footprint: serde_json::Value::Null,
            cloud_cover: Some(1.2),
        }
    }

    fn metadata() -> ProductMetadata {
        ProductMetadata {
            granule: "A046314".to_string(),
            datastrip: "20240504T195929".to_string(),
        }
    }

    #[test]
    fn test_title_fields() {
        let title = ProductTitle::parse(TITLE).unwrap();
        assert_eq!(title.level, "MSIL2A");
        assert_eq!(title.acquisition_date, "20240504T195901");
        assert_eq!(title.tile, "T08VPH");
        assert_eq!(title.metadata_file_name(), "MTD_MSIL2A.xml");
    }

    #[test]
    fn test_build() {
        let name = build(&record(TITLE), &metadata()).unwrap();
        assert_eq!(name.as_str(), "L2A_T08VPH_A046314_20240504T195929");
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = build(&record(TITLE), &metadata()).unwrap();
        let b = build(&record(TITLE), &metadata()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_short_title() {
        assert_eq!(
            build(&record("S2A_MSIL2A_2024"), &metadata()).unwrap_err(),
            PathError::MalformedTitle("S2A_MSIL2A_2024".to_string())
        );
    }

    #[test]
    fn test_non_ascii_title_does_not_panic() {
        let title = "S2A_MSIL2A_20240504T195901_N0510_R128_Té8VPH_20240505T015750.SAFE";
        assert!(build(&record(title), &metadata()).is_err());
    }
}
