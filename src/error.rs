use std::error::Error as StdError;

use thiserror::Error;

/// Failure of a fetch or normalize step. Every variant is fatal to the
/// collection pipeline that raised it; nothing is retried.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("malformed response for '{resource}': {reason}")]
    MalformedResponse { resource: String, reason: String },

    #[error("request for '{resource}' failed")]
    Transport {
        resource: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("cannot compute content digest: {0}")]
    Hashing(String),

    #[error("{type_name} item has neither an 'id' nor a 'name' field")]
    MissingIdentifier { type_name: String },

    #[error("'{resource}' still has pages after {max_pages} requests")]
    PageLimitExceeded { resource: String, max_pages: u32 },

    #[error("duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("{type_name} transform failed: {reason}")]
    Transform { type_name: String, reason: String },

    #[error("node sink failure: {0}")]
    Sink(String),
}

impl SourceError {
    pub fn transport(
        resource: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            resource: resource.into(),
            source: Box::new(source),
        }
    }

    pub fn malformed(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            resource: resource.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SourceError>;
