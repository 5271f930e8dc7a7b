//! Link-following pagination over the catalogue's OpenSearch `search.json` endpoint.
use crate::auth::TokenManager;
use crate::error::SearchError;
use crate::http::{HttpClient, HttpResponse};
use crate::query::{Collection, SearchQuery};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    /// Catalogue UUID, needed for OData node access.
    pub id: Option<String>,
    pub title: String,
    /// Storage path of the product, e.g. `/eodata/Sentinel-2/MSI/L2A/2024/05/04/<title>`.
    pub product_identifier: String,
    pub footprint: serde_json::Value,
    pub cloud_cover: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Link {
    pub rel: String,
    pub href: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub records: Vec<ProductRecord>,
    pub links: Vec<Link>,
}

impl SearchPage {
    pub fn link(&self, rel: &str) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel == rel)
            .map(|l| l.href.as_str())
    }

    pub fn next(&self) -> Option<&str> {
        self.link("next")
    }

    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        let raw: RawPage = serde_json::from_str(body)?;
        let records = raw
            .features
            .into_iter()
            .map(|f| ProductRecord {
                id: f.id,
                title: f.properties.title,
                product_identifier: f.properties.product_identifier,
                footprint: f.geometry,
                cloud_cover: f.properties.cloud_cover,
            })
            .collect();
        let links = raw.properties.map(|p| p.links).unwrap_or_default();
        Ok(Self { records, links })
    }
}

#[derive(Deserialize)]
struct RawPage {
    #[serde(default)]
    features: Vec<RawFeature>,
    properties: Option<RawPageProperties>,
}

#[derive(Deserialize)]
struct RawPageProperties {
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Deserialize)]
struct RawFeature {
    id: Option<String>,
    #[serde(default)]
    geometry: serde_json::Value,
    properties: RawFeatureProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFeatureProperties {
    title: String,
    product_identifier: String,
    cloud_cover: Option<f64>,
}

/// Everything a search produced before it ended, plus the error that ended it, if any.
#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub records: Vec<ProductRecord>,
    pub error: Option<SearchError>,
}

enum Cursor {
    Start,
    Next(Url),
    Done,
}

pub struct SearchClient<H> {
    http: H,
    catalog_url: Url,
    auth: Option<TokenManager<H>>,
}

impl<H: HttpClient> SearchClient<H> {
    pub fn new(http: H, catalog_url: Url) -> Self {
        Self {
            http,
            catalog_url,
            auth: None,
        }
    }

    /// Sends every request through `tokens` with a bearer token.
    pub fn with_auth(mut self, tokens: TokenManager<H>) -> Self {
        self.auth = Some(tokens);
        self
    }

    pub fn auth(&self) -> Option<&TokenManager<H>> {
        self.auth.as_ref()
    }

    async fn get(&self, url: &Url) -> Result<HttpResponse, SearchError> {
        match &self.auth {
            Some(tokens) => Ok(tokens.authorized_get(url).await?),
            None => Ok(self.http.get(url, None).await?),
        }
    }

    async fn fetch_page(&self, url: &Url) -> Result<SearchPage, SearchError> {
        debug!(%url, "Fetching search page");
        let response = self.get(url).await?;
        if !response.is_success() {
            return Err(SearchError::Status {
                status: response.status,
                body: response.body,
            });
        }
        SearchPage::parse(&response.body).map_err(|e| SearchError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// Lazily yields every record matching `query`, page by page, following `rel="next"` links
    /// until a page has none. Each call starts over from the query's own page. Any failure is
    /// yielded once and ends the stream; records already yielded stay valid. Cancellation is
    /// checked before each page fetch and ends the stream without an error.
    pub fn search<'a>(
        &'a self,
        query: &'a SearchQuery,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<ProductRecord, SearchError>> + 'a {
        stream::unfold((Cursor::Start, HashSet::new()), move |(cursor, mut visited)| {
            let cancel = cancel.clone();
            async move {
                let url = match cursor {
                    Cursor::Start => query.search_url(&self.catalog_url),
                    Cursor::Next(url) => url,
                    Cursor::Done => return None,
                };
                if cancel.is_cancelled() {
                    info!("Search cancelled before fetching {url}");
                    return None;
                }
                visited.insert(url.clone());

                let (items, next) = match self.fetch_page(&url).await {
                    Ok(page) => {
                        let next = next_cursor(&page, &visited);
                        let items: Vec<_> = page.records.into_iter().map(Ok).collect();
                        match next {
                            Ok(next) => (items, next),
                            Err(err) => {
                                let mut items = items;
                                items.push(Err(err));
                                (items, Cursor::Done)
                            }
                        }
                    }
                    Err(err) => (vec![Err(err)], Cursor::Done),
                };
                Some((stream::iter(items), (next, visited)))
            }
        })
        .flatten()
    }

    /// Drains [`search`](Self::search), keeping every record received before a failure.
    pub async fn collect(&self, query: &SearchQuery, cancel: CancellationToken) -> SearchOutcome {
        let mut outcome = SearchOutcome::default();
        let results = self.search(query, cancel);
        futures_util::pin_mut!(results);
        while let Some(result) = results.next().await {
            match result {
                Ok(record) => outcome.records.push(record),
                Err(err) => outcome.error = Some(err),
            }
        }
        info!(
            products = outcome.records.len(),
            failed = outcome.error.is_some(),
            "Search finished"
        );
        outcome
    }

    /// Fetches the collection's `describe.xml` schema verbatim.
    pub async fn describe(&self, collection: Collection) -> Result<String, SearchError> {
        let url = collection.describe_url(&self.catalog_url);
        let response = self.get(&url).await?;
        if !response.is_success() {
            return Err(SearchError::Status {
                status: response.status,
                body: response.body,
            });
        }
        Ok(response.body)
    }
}

/// A `next` link pointing at any page already fetched by this search is a cycle.
fn next_cursor(page: &SearchPage, visited: &HashSet<Url>) -> Result<Cursor, SearchError> {
    if page.records.is_empty() {
        return Ok(Cursor::Done);
    }
    let Some(href) = page.next() else {
        return Ok(Cursor::Done);
    };
    let next = Url::parse(href).map_err(|_| SearchError::InvalidLink(href.to_string()))?;
    if visited.contains(&next) {
        return Err(SearchError::Pagination(href.to_string()));
    }
    Ok(Cursor::Next(next))
}
