use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Result, SourceError};

pub const DEFAULT_API_BASE: &str = "https://api.storyblok.com/v1";

/// Query for one page of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParams {
    pub version: String,
    pub per_page: u32,
    pub page: u32,
    pub extra: Vec<(String, String)>,
}

/// One page as the CMS reports it. `data` is expected to hold a single key
/// (e.g. `stories`) mapping to the page's items; the fetcher validates that.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResponse {
    pub data: Map<String, Value>,
    pub total: u64,
    pub per_page: u64,
}

#[async_trait]
pub trait CmsClient: Send + Sync {
    async fn get(&self, resource_type: &str, params: &QueryParams) -> Result<PageResponse>;
}

/// Storyblok content delivery API over reqwest.
pub struct StoryblokClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl StoryblokClient {
    pub fn new(token: &str, api_base: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::transport("client", e))?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Resource types may carry their own query string
    /// (`cdn/datasource_entries?datasource=colors`); page params are appended.
    fn page_url(&self, resource_type: &str, params: &QueryParams) -> Result<Url> {
        let raw = format!("{}/{}", self.api_base, resource_type.trim_start_matches('/'));
        let mut url = Url::parse(&raw).map_err(|e| SourceError::transport(resource_type, e))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("token", &self.token);
            pairs.append_pair("version", &params.version);
            pairs.append_pair("per_page", &params.per_page.to_string());
            pairs.append_pair("page", &params.page.to_string());
            for (key, value) in &params.extra {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl CmsClient for StoryblokClient {
    async fn get(&self, resource_type: &str, params: &QueryParams) -> Result<PageResponse> {
        let url = self.page_url(resource_type, params)?;
        debug!(resource = resource_type, page = params.page, "GET");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SourceError::transport(resource_type, e))?;

        let total = header_u64(&response, "total");
        let per_page = header_u64(&response, "per-page");

        let data: Map<String, Value> = response
            .json()
            .await
            .map_err(|e| SourceError::transport(resource_type, e))?;

        Ok(PageResponse {
            total: total.unwrap_or_else(|| item_count(&data)),
            per_page: per_page.unwrap_or(u64::from(params.per_page)),
            data,
        })
    }
}

fn header_u64(response: &reqwest::Response, name: &str) -> Option<u64> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

/// Fallback `total` when the server omits the header: whatever this page holds.
fn item_count(data: &Map<String, Value>) -> u64 {
    data.values()
        .filter_map(Value::as_array)
        .map(|items| items.len() as u64)
        .sum()
}
