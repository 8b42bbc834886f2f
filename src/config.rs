use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use regex::Regex;
use serde::Deserialize;

use crate::client::DEFAULT_API_BASE;

static DATASOURCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

const VERSIONS: [&str; 2] = ["draft", "published"];

/// Source plugin options. Layered from `storyblok.toml` (optional) and
/// `STORYBLOK_*` environment variables; CLI flags override both.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceOptions {
    pub access_token: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub data_sources: Vec<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub resolve_relations: Option<String>,
    #[serde(default)]
    pub resolve_links: Option<String>,
    /// Page-count ceiling per collection. Unset trusts the server's totals.
    #[serde(default)]
    pub max_pages: Option<u32>,
    #[serde(default)]
    pub check_unique_ids: bool,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_version() -> String {
    "published".to_string()
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/storyblok.sqlite")
}

impl SourceOptions {
    #[cfg(test)]
    pub fn with_token(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            version: default_version(),
            data_sources: Vec::new(),
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
            resolve_relations: None,
            resolve_links: None,
            max_pages: None,
            check_unique_ids: false,
            db_path: default_db_path(),
        }
    }

    pub fn load(file: Option<&Path>) -> Result<Self> {
        let file_source = match file {
            Some(p) => File::from(p).required(true),
            None => File::with_name("storyblok").required(false),
        };

        let settings = Config::builder()
            .add_source(file_source)
            .add_source(
                Environment::with_prefix("STORYBLOK")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("data_sources"),
            )
            .build()
            .context("Failed to read configuration")?;

        settings
            .try_deserialize()
            .context("Invalid configuration (is STORYBLOK_ACCESS_TOKEN set?)")
    }

    pub fn validate(&self) -> Result<()> {
        if self.access_token.trim().is_empty() {
            bail!("access_token must not be empty");
        }
        if !VERSIONS.contains(&self.version.as_str()) {
            bail!("version must be one of {:?}, got {:?}", VERSIONS, self.version);
        }
        for name in &self.data_sources {
            if !DATASOURCE_RE.is_match(name) {
                bail!("invalid datasource name {:?}", name);
            }
        }
        if self.max_pages == Some(0) {
            bail!("max_pages must be at least 1");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
