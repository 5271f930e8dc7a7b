use crate::catalog::ProductRecord;
use crate::copernicus::MetadataSource;
use crate::error::{MapError, MetadataError};
use crate::path::ProductTitle;
use crate::s3::{self, split_storage_path};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::operation::get_object::GetObjectOutput;
use aws_sdk_s3::Client;
use aws_smithy_runtime_api::client::orchestrator::HttpRequest;
use std::time::Duration;
use tracing::debug;

/// Reads product files straight from the eodata S3 endpoint.
pub struct Provider {
    client: Client,
}

impl Provider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn from_profile(
        profile_name: &str,
        endpoint: &str,
        timeout: Duration,
        max_attempts: u32,
    ) -> Self {
        let client = s3::client_from_profile(profile_name, endpoint, timeout, max_attempts).await;
        Self { client }
    }
}

impl s3::S3ObjOps for Provider {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<GetObjectOutput, MetadataError> {
        self.client
            .get_object()
            .bucket(bucket)
            .key(key)
            .customize()
            .map_request(strip_x_id_get_object_param_from_uri)
            .send()
            .await
            .map_err(|e| MetadataError::Fetch(DisplayErrorContext(&e).to_string()))
    }
}

impl MetadataSource for Provider {
    async fn fetch(&self, product: &ProductRecord) -> Result<String, MetadataError> {
        let title = ProductTitle::parse(&product.title)?;
        let (bucket, prefix) = split_storage_path(&product.product_identifier)
            .ok_or_else(|| MetadataError::StoragePath(product.product_identifier.clone()))?;
        let key = format!("{prefix}/{}", title.metadata_file_name());
        debug!(%bucket, %key, "Fetching metadata from S3");

        let object = s3::S3ObjOps::get_object(self, &bucket, &key).await?;
        let data = object
            .body
            .collect()
            .await
            .map_err(|e| MetadataError::Fetch(e.to_string()))?
            .to_vec();
        String::from_utf8(data).map_err(|e| MetadataError::Xml(e.to_string()))
    }
}

/// The copernicus S3 API throws a fit if the param 'x-id=GetObject' is present in the request. This
/// function can be passed to the `GetObjectFluentBuilder::map_request()` method to strip the offending
/// param from the generated uri.
fn strip_x_id_get_object_param_from_uri(req: HttpRequest) -> Result<HttpRequest, MapError> {
    let mut r = req.try_clone().ok_or(MapError::Clone)?;
    let _ = r.set_uri(r.uri().replace("x-id=GetObject", ""));
    Ok(r)
}
