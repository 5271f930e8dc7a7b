//! Copernicus Data Space specifics: where product metadata lives and how to read it.
mod metadata;
mod odata;
mod provider;

pub use metadata::{resolve, ProductMetadata};
pub use odata::ODataMetadataSource;
pub use provider::Provider;

use crate::catalog::ProductRecord;
use crate::error::MetadataError;

/// Somewhere the raw metadata document of a product can be read from.
pub trait MetadataSource {
    async fn fetch(&self, product: &ProductRecord) -> Result<String, MetadataError>;
}
