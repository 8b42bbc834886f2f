use serde::Serialize;
use serde_json::{Map, Value};

use crate::digest::content_digest;
use crate::error::{Result, SourceError};
use crate::sink::NodeSink;

pub const MEDIA_TYPE: &str = "application/json";

/// Keys the node record owns; item fields with these names are replaced.
const RESERVED_KEYS: [&str; 4] = ["id", "parent", "children", "internal"];

pub type RawItem = Map<String, Value>;

/// Post-digest hook, free to mutate the node in place. A failure aborts the
/// collection like a hashing failure.
pub type Transform = dyn Fn(&mut Node) -> Result<()> + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Internal {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(rename = "contentDigest")]
    pub content_digest: String,
}

/// Content-graph node: the raw item's fields plus the graph bookkeeping.
/// Serializes flat, as the consuming graph expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub id: String,
    pub parent: Option<String>,
    pub children: Vec<String>,
    pub internal: Internal,
}

/// Build the node for `item`. The digest is taken over the item as received.
pub fn build_node(item: RawItem, type_name: &str) -> Result<Node> {
    let content_digest = content_digest(&item)?;
    let item_id = item_identifier(&item).ok_or_else(|| SourceError::MissingIdentifier {
        type_name: type_name.to_string(),
    })?;

    let mut fields = item;
    for key in RESERVED_KEYS {
        fields.remove(key);
    }

    Ok(Node {
        fields,
        id: node_id(type_name, &item_id),
        parent: None,
        children: Vec::new(),
        internal: Internal {
            media_type: MEDIA_TYPE.to_string(),
            node_type: type_name.to_string(),
            content_digest,
        },
    })
}

/// Normalize `items` in order, handing each node to `sink` as soon as it is
/// built. Stops at the first failure; nodes already emitted stay emitted.
pub fn create_nodes(
    items: Vec<RawItem>,
    type_name: &str,
    transform: Option<&Transform>,
    sink: &dyn NodeSink,
) -> Result<usize> {
    let mut emitted = 0;
    for item in items {
        let mut node = build_node(item, type_name)?;
        if let Some(transform) = transform {
            transform(&mut node).map_err(|e| match e {
                SourceError::Transform { .. } => e,
                other => SourceError::Transform {
                    type_name: type_name.to_string(),
                    reason: other.to_string(),
                },
            })?;
        }
        sink.create_node(node)?;
        emitted += 1;
    }
    Ok(emitted)
}

pub fn node_id(type_name: &str, item_id: &str) -> String {
    format!("{}-{}", type_name.to_lowercase(), item_id)
}

/// Stories and datasource entries carry `id`; tags only have `name`.
fn item_identifier(item: &RawItem) -> Option<String> {
    match item.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => item.get("name").and_then(Value::as_str).map(str::to_string),
    }
}
