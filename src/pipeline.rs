//! Per-product metadata resolution over a bounded worker pool.
use crate::catalog::ProductRecord;
use crate::copernicus::{self, MetadataSource, ProductMetadata};
use crate::error::MetadataError;
use crate::path::{self, ProductTitle, SubdirectoryName};
use futures_util::stream::{self, StreamExt};
use std::fmt::Write;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Mirrors the default `--transfers` ceiling handed to the bulk-copy tool.
pub const DEFAULT_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProduct {
    pub product: ProductRecord,
    pub acquisition_date: String,
    pub metadata: ProductMetadata,
    pub subdirectory: SubdirectoryName,
}

impl ResolvedProduct {
    /// Remote path of the granule directory, relative to the storage root.
    pub fn source_path(&self) -> String {
        format!(
            "{}/GRANULE/{}",
            self.product.product_identifier.trim_matches('/'),
            self.subdirectory
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionFailure {
    pub title: String,
    pub error: MetadataError,
}

#[derive(Debug, Default)]
pub struct ResolutionReport {
    pub resolved: Vec<ResolvedProduct>,
    pub failures: Vec<ResolutionFailure>,
    /// Titles never attempted because the run was cancelled.
    pub skipped: Vec<String>,
}

impl ResolutionReport {
    pub fn source_paths(&self) -> Vec<String> {
        self.resolved.iter().map(ResolvedProduct::source_path).collect()
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} resolved, {} failed, {} skipped",
            self.resolved.len(),
            self.failures.len(),
            self.skipped.len()
        );
        for failure in &self.failures {
            let _ = write!(out, "\n  {}: {}", failure.title, failure.error);
        }
        out
    }
}

enum Outcome {
    Resolved(ResolvedProduct),
    Failed(ResolutionFailure),
    Skipped(String),
}

async fn resolve_one(
    source: &impl MetadataSource,
    product: &ProductRecord,
) -> Result<ResolvedProduct, MetadataError> {
    let title = ProductTitle::parse(&product.title)?;
    let document = source.fetch(product).await?;
    let metadata = copernicus::resolve(&document)?;
    let subdirectory = path::build(product, &metadata)?;
    Ok(ResolvedProduct {
        acquisition_date: title.acquisition_date.to_string(),
        product: product.clone(),
        metadata,
        subdirectory,
    })
}

/// Fetches and resolves the metadata of every product with at most `concurrency` requests in
/// flight. Failures are recorded per product; once `cancel` fires the remaining products are
/// reported as skipped. Results keep the input order.
pub async fn resolve_products(
    source: &impl MetadataSource,
    products: Vec<ProductRecord>,
    concurrency: usize,
    cancel: &CancellationToken,
) -> ResolutionReport {
    let total = products.len();
    info!(products = total, concurrency, "Resolving product metadata");

    let outcomes: Vec<Outcome> = stream::iter(products)
        .map(|product| async move {
            if cancel.is_cancelled() {
                return Outcome::Skipped(product.title);
            }
            match resolve_one(source, &product).await {
                Ok(resolved) => {
                    debug!(title = %product.title, subdirectory = %resolved.subdirectory, "Resolved");
                    Outcome::Resolved(resolved)
                }
                Err(error) => {
                    warn!(title = %product.title, %error, "Unable to resolve metadata");
                    Outcome::Failed(ResolutionFailure {
                        title: product.title,
                        error,
                    })
                }
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut report = ResolutionReport::default();
    for outcome in outcomes {
        match outcome {
            Outcome::Resolved(r) => report.resolved.push(r),
            Outcome::Failed(f) => report.failures.push(f),
            Outcome::Skipped(t) => report.skipped.push(t),
        }
    }
    info!("{}", report.summary().lines().next().unwrap_or_default());
    report
}
