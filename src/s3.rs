//! Utility functions for creating s3 clients against the eodata endpoint
use crate::error::MetadataError;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::operation::get_object::GetObjectOutput;
use aws_sdk_s3::Client;
use std::time::Duration;

const DEFAULT_REGION: &str = "us-east-1";

pub async fn client_from_profile(
    profile_name: &str,
    endpoint: &str,
    timeout: Duration,
    max_attempts: u32,
) -> Client {
    let base_config = aws_config::from_env()
        .profile_name(profile_name)
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&base_config)
        .endpoint_url(endpoint)
        .region(Region::new(DEFAULT_REGION))
        .force_path_style(true)
        .timeout_config(TimeoutConfig::builder().operation_timeout(timeout).build())
        .retry_config(RetryConfig::standard().with_max_attempts(max_attempts.max(1)))
        .build();

    Client::from_conf(s3_config)
}

pub trait S3ObjOps {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<GetObjectOutput, MetadataError>;
}

/// Splits a storage path such as `/eodata/Sentinel-2/MSI/L2A/.../X.SAFE` into its bucket and
/// the key prefix below it.
pub fn split_storage_path(path: &str) -> Option<(String, String)> {
    let (bucket, prefix) = path.trim_start_matches('/').split_once('/')?;
    let prefix = prefix.trim_end_matches('/');
    if bucket.is_empty() || prefix.is_empty() {
        return None;
    }
    Some((bucket.to_owned(), prefix.to_owned()))
}
