use futures_util::future::try_join_all;
use serde_json::Value;
use tracing::info;

use crate::client::CmsClient;
use crate::config::SourceOptions;
use crate::error::{Result, SourceError};
use crate::fetch::{CollectionRequest, FetchConfig, PaginatedFetcher};
use crate::node::{create_nodes, Node, Transform};
use crate::sink::{NodeSink, StatusSink, UniqueIds};

pub const STORY_TYPE: &str = "StoryblokEntry";
pub const TAG_TYPE: &str = "StoryblokTag";
pub const DATASOURCE_ENTRY_TYPE: &str = "StoryblokDatasourceEntry";

/// A fetch + normalize pipeline for one collection.
pub struct Collection {
    pub label: String,
    pub request: CollectionRequest,
    pub type_name: &'static str,
    pub transform: Option<Box<Transform>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionReport {
    pub label: String,
    pub type_name: &'static str,
    pub nodes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceReport {
    pub collections: Vec<CollectionReport>,
}

impl SourceReport {
    pub fn total_nodes(&self) -> usize {
        self.collections.iter().map(|c| c.nodes).sum()
    }
}

/// Stories, tags, then one collection per configured datasource.
///
/// `resolve_relations` / `resolve_links` are passed through as-is. The page
/// payload must still hold only `stories`: a response that carries resolved
/// entities in side arrays (`rels`, `links`) fails as malformed.
pub fn collections(options: &SourceOptions) -> Vec<Collection> {
    let mut stories = CollectionRequest::new("cdn/stories", &options.version);
    if let Some(relations) = &options.resolve_relations {
        stories = stories.with_param("resolve_relations", relations);
    }
    if let Some(links) = &options.resolve_links {
        stories = stories.with_param("resolve_links", links);
    }

    let mut all = vec![
        Collection {
            label: "stories".to_string(),
            request: stories,
            type_name: STORY_TYPE,
            transform: Some(Box::new(stringify_content)),
        },
        Collection {
            label: "tags".to_string(),
            request: CollectionRequest::new("cdn/tags", &options.version),
            type_name: TAG_TYPE,
            transform: None,
        },
    ];

    for name in &options.data_sources {
        let data_source = name.clone();
        all.push(Collection {
            label: format!("datasource:{}", name),
            request: CollectionRequest::new(
                format!("cdn/datasource_entries?datasource={}", name),
                &options.version,
            ),
            type_name: DATASOURCE_ENTRY_TYPE,
            transform: Some(Box::new(move |node: &mut Node| -> Result<()> {
                node.fields
                    .insert("data_source".to_string(), Value::String(data_source.clone()));
                Ok(())
            })),
        });
    }
    all
}

/// Story `content` is a rich component tree; the graph gets it as a JSON string.
fn stringify_content(node: &mut Node) -> Result<()> {
    if let Some(content) = node.fields.get_mut("content") {
        let text = serde_json::to_string(content).map_err(|e| SourceError::Transform {
            type_name: STORY_TYPE.to_string(),
            reason: format!("cannot serialize content: {}", e),
        })?;
        *content = Value::String(text);
    }
    Ok(())
}

/// Fetch and normalize every collection concurrently. Resolves once all are
/// done; the first failure wins and the remaining pipelines are dropped.
pub async fn source_nodes<C: CmsClient + ?Sized>(
    client: &C,
    sink: &dyn NodeSink,
    status: &dyn StatusSink,
    options: &SourceOptions,
) -> Result<SourceReport> {
    let unique;
    let sink: &dyn NodeSink = if options.check_unique_ids {
        unique = UniqueIds::new(sink);
        &unique
    } else {
        sink
    };

    let config = FetchConfig {
        max_pages: options.max_pages,
    };
    let fetcher = PaginatedFetcher::new(client, status, config);
    let pipelines = collections(options);

    info!(collections = pipelines.len(), version = %options.version, "sourcing nodes");
    let reports = try_join_all(
        pipelines
            .iter()
            .map(|collection| run_collection(&fetcher, collection, sink)),
    )
    .await?;

    Ok(SourceReport {
        collections: reports,
    })
}

async fn run_collection<C: CmsClient + ?Sized>(
    fetcher: &PaginatedFetcher<'_, C>,
    collection: &Collection,
    sink: &dyn NodeSink,
) -> Result<CollectionReport> {
    let items = fetcher.fetch_all(&collection.request).await?;
    let nodes = create_nodes(
        items,
        collection.type_name,
        collection.transform.as_deref(),
        sink,
    )?;
    info!(collection = %collection.label, nodes, "nodes created");
    Ok(CollectionReport {
        label: collection.label.clone(),
        type_name: collection.type_name,
        nodes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{PageResponse, QueryParams};
    use crate::sink::PluginStatus;
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// In-memory CMS: each resource type maps to its full item list, served
    /// in pages of the requested size.
    struct FakeCms {
        collections: HashMap<String, (String, Vec<Value>)>,
        requests: Mutex<Vec<(String, u32)>>,
        fail_on: Option<String>,
    }

    impl FakeCms {
        fn new() -> Self {
            Self {
                collections: HashMap::new(),
                requests: Mutex::new(Vec::new()),
                fail_on: None,
            }
        }

        fn with(mut self, resource: &str, key: &str, items: Vec<Value>) -> Self {
            self.collections
                .insert(resource.to_string(), (key.to_string(), items));
            self
        }

        fn requested(&self, resource: &str) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|(r, _)| r == resource)
                .count()
        }
    }

    #[async_trait]
    impl CmsClient for FakeCms {
        async fn get(&self, resource_type: &str, params: &QueryParams) -> Result<PageResponse> {
            self.requests
                .lock()
                .unwrap()
                .push((resource_type.to_string(), params.page));
            if self.fail_on.as_deref() == Some(resource_type) {
                return Err(SourceError::transport(resource_type, std::fmt::Error));
            }
            let (key, items) = self
                .collections
                .get(resource_type)
                .cloned()
                .unwrap_or_else(|| ("items".to_string(), Vec::new()));
            let per_page = params.per_page as usize;
            let start = (params.page as usize - 1) * per_page;
            let slice: Vec<Value> = items.iter().skip(start).take(per_page).cloned().collect();

            let mut data = Map::new();
            data.insert(key, Value::Array(slice));
            Ok(PageResponse {
                data,
                total: items.len() as u64,
                per_page: params.per_page as u64,
            })
        }
    }

    /// Holds the first stories page until tags has been requested, so it only
    /// completes if both pipelines are in flight at once.
    struct GatedCms {
        inner: FakeCms,
        tags_requested: Notify,
    }

    #[async_trait]
    impl CmsClient for GatedCms {
        async fn get(&self, resource_type: &str, params: &QueryParams) -> Result<PageResponse> {
            match resource_type {
                "cdn/stories" if params.page == 1 => self.tags_requested.notified().await,
                "cdn/tags" => self.tags_requested.notify_one(),
                _ => {}
            }
            self.inner.get(resource_type, params).await
        }
    }

    /// Stories pages that carry resolved relations next to the collection.
    struct SideArrayCms;

    #[async_trait]
    impl CmsClient for SideArrayCms {
        async fn get(&self, resource_type: &str, params: &QueryParams) -> Result<PageResponse> {
            let mut data = Map::new();
            if resource_type == "cdn/stories" {
                data.insert("stories".to_string(), json!([{ "id": 1, "content": {} }]));
                data.insert("rels".to_string(), json!([{ "uuid": "a-1" }]));
            } else {
                data.insert("tags".to_string(), json!([]));
            }
            Ok(PageResponse {
                data,
                total: 1,
                per_page: params.per_page as u64,
            })
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<Node>>);

    impl NodeSink for Collect {
        fn create_node(&self, node: Node) -> Result<()> {
            self.0.lock().unwrap().push(node);
            Ok(())
        }
    }

    impl Collect {
        fn of_type(&self, type_name: &str) -> Vec<Node> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter(|n| n.internal.node_type == type_name)
                .cloned()
                .collect()
        }
    }

    #[derive(Default)]
    struct Beats(Mutex<usize>);

    impl StatusSink for Beats {
        fn set_plugin_status(&self, _status: PluginStatus) {
            *self.0.lock().unwrap() += 1;
        }
    }

    fn stories(n: u64) -> Vec<Value> {
        (1..=n)
            .map(|i| json!({ "id": i, "name": format!("story {}", i), "content": { "component": "page", "body": [] } }))
            .collect()
    }

    fn entries(prefix: &str, n: u64) -> Vec<Value> {
        (1..=n)
            .map(|i| json!({ "id": format!("{}{}", prefix, i), "name": format!("{}-{}", prefix, i), "value": i }))
            .collect()
    }

    #[tokio::test]
    async fn stories_and_tags() {
        let cms = FakeCms::new()
            .with("cdn/stories", "stories", stories(25))
            .with("cdn/tags", "tags", vec![json!({ "name": "news", "taggings_count": 2 })]);
        let sink = Collect::default();
        let beats = Beats::default();

        let report = source_nodes(&cms, &sink, &beats, &SourceOptions::with_token("t"))
            .await
            .unwrap();

        assert_eq!(report.total_nodes(), 26);
        assert_eq!(cms.requested("cdn/stories"), 3);
        assert_eq!(cms.requested("cdn/tags"), 1);
        assert_eq!(*beats.0.lock().unwrap(), 4);

        let story_nodes = sink.of_type(STORY_TYPE);
        assert_eq!(story_nodes.len(), 25);
        assert_eq!(story_nodes[0].id, "storyblokentry-1");
        assert!(story_nodes.iter().all(|n| n.fields["content"].is_string()));

        let tags = sink.of_type(TAG_TYPE);
        assert_eq!(tags[0].id, "storybloktag-news");
    }

    #[tokio::test]
    async fn story_content_becomes_json_string() {
        let cms = FakeCms::new().with("cdn/stories", "stories", stories(1));
        let sink = Collect::default();
        source_nodes(&cms, &sink, &Beats::default(), &SourceOptions::with_token("t"))
            .await
            .unwrap();

        let node = &sink.of_type(STORY_TYPE)[0];
        let content: Value = serde_json::from_str(node.fields["content"].as_str().unwrap()).unwrap();
        assert_eq!(content, json!({ "component": "page", "body": [] }));
    }

    #[tokio::test]
    async fn datasources_stamp_their_name() {
        let cms = FakeCms::new()
            .with("cdn/datasource_entries?datasource=colors", "datasource_entries", entries("c", 12))
            .with("cdn/datasource_entries?datasource=sizes", "datasource_entries", entries("s", 3));
        let sink = Collect::default();
        let mut options = SourceOptions::with_token("t");
        options.data_sources = vec!["colors".into(), "sizes".into()];

        let report = source_nodes(&cms, &sink, &Beats::default(), &options).await.unwrap();

        let labels: Vec<&str> = report.collections.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["stories", "tags", "datasource:colors", "datasource:sizes"]);

        let entries = sink.of_type(DATASOURCE_ENTRY_TYPE);
        assert_eq!(entries.len(), 15);
        for node in &entries {
            let expected = if node.id.starts_with("storyblokdatasourceentry-c") { "colors" } else { "sizes" };
            assert_eq!(node.fields["data_source"], json!(expected));
        }
        assert_eq!(cms.requested("cdn/datasource_entries?datasource=colors"), 2);
        assert_eq!(cms.requested("cdn/datasource_entries?datasource=sizes"), 1);
    }

    #[tokio::test]
    async fn collections_are_fetched_concurrently() {
        let cms = GatedCms {
            inner: FakeCms::new()
                .with("cdn/stories", "stories", stories(15))
                .with("cdn/tags", "tags", vec![json!({ "name": "news" })]),
            tags_requested: Notify::new(),
        };
        let sink = Collect::default();
        let options = SourceOptions::with_token("t");

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            source_nodes(&cms, &sink, &Beats::default(), &options),
        )
        .await
        .expect("stories waited on a tags request that never came")
        .unwrap();

        assert_eq!(report.total_nodes(), 16);
        let order: Vec<String> = cms
            .inner
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|(r, _)| r.clone())
            .collect();
        assert_eq!(order, vec!["cdn/tags", "cdn/stories", "cdn/stories"]);
    }

    #[tokio::test]
    async fn transform_failure_fails_its_collection() {
        let cms = FakeCms::new().with("cdn/tags", "tags", vec![json!({ "name": "news" })]);
        let beats = Beats::default();
        let fetcher = PaginatedFetcher::new(&cms, &beats, FetchConfig::default());
        let collection = Collection {
            label: "tags".to_string(),
            request: CollectionRequest::new("cdn/tags", "published"),
            type_name: TAG_TYPE,
            transform: Some(Box::new(|_: &mut Node| -> Result<()> {
                Err(SourceError::Transform {
                    type_name: TAG_TYPE.to_string(),
                    reason: "rejected".to_string(),
                })
            })),
        };
        let sink = Collect::default();

        let err = run_collection(&fetcher, &collection, &sink).await.unwrap_err();

        assert!(matches!(err, SourceError::Transform { reason, .. } if reason == "rejected"));
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolved_relations_in_side_array_are_malformed() {
        let mut options = SourceOptions::with_token("t");
        options.resolve_relations = Some("page.author".into());

        let err = source_nodes(&SideArrayCms, &Collect::default(), &Beats::default(), &options)
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::MalformedResponse { resource, .. } if resource == "cdn/stories"));
    }

    #[tokio::test]
    async fn first_failure_fails_the_run() {
        let mut cms = FakeCms::new().with("cdn/stories", "stories", stories(5));
        cms.fail_on = Some("cdn/tags".to_string());
        let sink = Collect::default();

        let err = source_nodes(&cms, &sink, &Beats::default(), &SourceOptions::with_token("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Transport { resource, .. } if resource == "cdn/tags"));
    }

    #[tokio::test]
    async fn duplicate_ids_detected_when_enabled() {
        let dup = vec![json!({ "id": 1 }), json!({ "id": 1 })];
        let cms = FakeCms::new().with("cdn/stories", "stories", dup);
        let sink = Collect::default();
        let mut options = SourceOptions::with_token("t");

        source_nodes(&cms, &sink, &Beats::default(), &options).await.unwrap();
        assert_eq!(sink.of_type(STORY_TYPE).len(), 2);

        options.check_unique_ids = true;
        let err = source_nodes(&cms, &Collect::default(), &Beats::default(), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::DuplicateNodeId(id) if id == "storyblokentry-1"));
    }

    #[test]
    fn story_request_carries_resolve_options() {
        let mut options = SourceOptions::with_token("t");
        options.version = "draft".into();
        options.resolve_relations = Some("page.author".into());
        options.resolve_links = Some("url".into());

        let all = collections(&options);
        assert_eq!(all[0].request.resource_type, "cdn/stories");
        assert_eq!(all[0].request.version, "draft");
        assert_eq!(
            all[0].request.extra,
            vec![
                ("resolve_relations".to_string(), "page.author".to_string()),
                ("resolve_links".to_string(), "url".to_string()),
            ]
        );
        assert!(all[1].request.extra.is_empty());
    }
}
