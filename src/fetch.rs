use serde_json::Value;
use tracing::{debug, info};

use crate::client::{CmsClient, QueryParams};
use crate::error::{Result, SourceError};
use crate::node::RawItem;
use crate::sink::{PluginStatus, StatusSink};

pub const PAGE_SIZE: u32 = 10;

/// One collection to fetch: a resource type plus the params fixed for every
/// page (version, filters). Page and page size are added per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRequest {
    pub resource_type: String,
    pub version: String,
    pub extra: Vec<(String, String)>,
}

impl CollectionRequest {
    pub fn new(resource_type: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            version: version.into(),
            extra: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    fn page(&self, page: u32) -> QueryParams {
        QueryParams {
            version: self.version.clone(),
            per_page: PAGE_SIZE,
            page,
            extra: self.extra.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchConfig {
    pub max_pages: Option<u32>,
}

/// Walks a collection page by page until the server-reported total is
/// reached. Requests are strictly sequential.
///
/// The loop trusts the server's `total`: a server that never delivers that
/// many items keeps it going. Set `max_pages` to bound it.
pub struct PaginatedFetcher<'a, C: ?Sized> {
    client: &'a C,
    status: &'a dyn StatusSink,
    config: FetchConfig,
}

impl<'a, C: CmsClient + ?Sized> PaginatedFetcher<'a, C> {
    pub fn new(client: &'a C, status: &'a dyn StatusSink, config: FetchConfig) -> Self {
        Self {
            client,
            status,
            config,
        }
    }

    /// All items of the collection in page order. Any failure discards what
    /// was gathered so far.
    pub async fn fetch_all(&self, request: &CollectionRequest) -> Result<Vec<RawItem>> {
        let resource = request.resource_type.as_str();
        let mut items: Vec<RawItem> = Vec::new();
        let mut count: u64 = 0;
        let mut page: u32 = 1;

        loop {
            if let Some(max_pages) = self.config.max_pages {
                if page > max_pages {
                    return Err(SourceError::PageLimitExceeded {
                        resource: resource.to_string(),
                        max_pages,
                    });
                }
            }

            let response = self.client.get(resource, &request.page(page)).await?;
            self.status.set_plugin_status(PluginStatus::now());

            let batch = single_collection(resource, response.data)?;
            count += batch.len() as u64;
            items.extend(batch);

            let ceiling = last_page(response.total, response.per_page);
            debug!(resource, page, count, total = response.total, ceiling, "page fetched");

            if !has_next_page(count, response.total, page, ceiling) {
                break;
            }
            page += 1;
        }

        info!(resource, items = items.len(), pages = page, "collection fetched");
        Ok(items)
    }
}

/// The page payload must be exactly one key mapping to an array of objects.
pub fn single_collection(
    resource: &str,
    data: serde_json::Map<String, Value>,
) -> Result<Vec<RawItem>> {
    if data.len() != 1 {
        let keys: Vec<&String> = data.keys().collect();
        return Err(SourceError::malformed(
            resource,
            format!("expected exactly one key in data, found {:?}", keys),
        ));
    }

    let (key, value) = data.into_iter().next().ok_or_else(|| {
        SourceError::malformed(resource, "expected exactly one key in data, found none")
    })?;
    let Value::Array(entries) = value else {
        return Err(SourceError::malformed(resource, format!("'{}' is not an array", key)));
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| match entry {
            Value::Object(item) => Ok(item),
            _ => Err(SourceError::malformed(
                resource,
                format!("'{}'[{}] is not an object", key, i),
            )),
        })
        .collect()
}

/// `ceil(total / per_page)`; a zero `per_page` falls back to the requested size.
fn last_page(total: u64, per_page: u64) -> u64 {
    let per_page = if per_page == 0 { u64::from(PAGE_SIZE) } else { per_page };
    total.div_ceil(per_page)
}

/// Both conditions are kept: the running count against the total and the
/// page index against the page ceiling.
fn has_next_page(count: u64, total: u64, page: u32, last_page: u64) -> bool {
    count < total && u64::from(page) <= last_page
}
