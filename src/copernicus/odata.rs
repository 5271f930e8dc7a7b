use crate::auth::TokenManager;
use crate::catalog::ProductRecord;
use crate::copernicus::MetadataSource;
use crate::error::MetadataError;
use crate::http::HttpClient;
use crate::path::ProductTitle;
use tracing::debug;
use url::Url;

/// Downloads the metadata document of a product through the OData node API. Every request
/// carries a bearer token from the wrapped [`TokenManager`].
pub struct ODataMetadataSource<H> {
    tokens: TokenManager<H>,
    odata_url: Url,
}

impl<H: HttpClient> ODataMetadataSource<H> {
    pub fn new(tokens: TokenManager<H>, odata_url: Url) -> Self {
        Self { tokens, odata_url }
    }

    pub fn tokens(&self) -> &TokenManager<H> {
        &self.tokens
    }

    /// `{odata}/Products({id})/Nodes({title})/Nodes({file})/$value`
    pub fn node_url(&self, product: &ProductRecord, file_name: &str) -> Result<Url, MetadataError> {
        let id = product.id.as_deref().ok_or(MetadataError::MissingProductId)?;
        let mut url = self.odata_url.clone();
        url.path_segments_mut()
            .map_err(|_| MetadataError::StoragePath(self.odata_url.to_string()))?
            .pop_if_empty()
            .extend([
                format!("Products({id})"),
                format!("Nodes({})", product.title),
                format!("Nodes({file_name})"),
                "$value".to_string(),
            ]);
        Ok(url)
    }
}

impl<H: HttpClient> MetadataSource for ODataMetadataSource<H> {
    async fn fetch(&self, product: &ProductRecord) -> Result<String, MetadataError> {
        let title = ProductTitle::parse(&product.title)?;
        let url = self.node_url(product, &title.metadata_file_name())?;
        debug!(%url, "Fetching metadata over OData");

        let response = self.tokens.authorized_get(&url).await?;
        if !response.is_success() {
            return Err(MetadataError::Status {
                status: response.status,
            });
        }
        Ok(response.body)
    }
}
