//! Job sources feeding the gated producer.
//!
//! A source hands out one payload per [`JobSource::next_batch`] call and owns
//! its own resume position. The producer only ever sees the trait.
//!
//! - [`FixtureSource`]: fixed in-memory paragraphs, for local runs and tests
//! - [`DescriptionSource`]: map unit descriptions from the metadata API
//! - [`ParagraphSource`]: paragraph ids from the search index

pub mod descriptions;
pub mod fixture;
pub mod paragraphs;

use std::str::FromStr;

use async_trait::async_trait;

use crate::config::SourceConfig;
use crate::error::{ManagerError, Result};
use crate::scheduler::job::JobPayload;

pub use descriptions::{DescriptionLookup, DescriptionSource, MacrostratClient};
pub use fixture::FixtureSource;
pub use paragraphs::ParagraphSource;

/// One unit of production.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub payload: JobPayload,
    /// No batches follow this one
    pub last: bool,
}

#[async_trait]
pub trait JobSource: Send {
    /// Position the source at a previously reported offset. An empty offset
    /// means the beginning.
    async fn init(&mut self, offset: &str) -> Result<()>;

    /// Fetch up to `size` items as one payload.
    async fn next_batch(&mut self, size: usize) -> Result<Batch>;

    /// Resume position after the last returned batch.
    fn offset(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Fixture,
    Descriptions,
    Paragraphs,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Fixture => write!(f, "test"),
            SourceKind::Descriptions => write!(f, "map_descrip"),
            SourceKind::Paragraphs => write!(f, "weaviate"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = ManagerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "test" | "fixture" => Ok(SourceKind::Fixture),
            "map_descrip" | "descriptions" => Ok(SourceKind::Descriptions),
            "weaviate" | "paragraphs" => Ok(SourceKind::Paragraphs),
            other => Err(ManagerError::InvalidConfig(format!(
                "unknown job source '{}'",
                other
            ))),
        }
    }
}

/// Construct the source selected by `kind`. The caller still has to `init` it.
pub fn build_source(kind: SourceKind, config: &SourceConfig) -> Result<Box<dyn JobSource>> {
    let source: Box<dyn JobSource> = match kind {
        SourceKind::Fixture => Box::new(FixtureSource::default()),
        SourceKind::Descriptions => Box::new(DescriptionSource::new(MacrostratClient::new(
            &config.metadata_api_url,
        )?)),
        SourceKind::Paragraphs => Box::new(ParagraphSource::new(
            &config.index_scheme,
            &config.index_host,
            config.index_api_key.clone(),
        )?),
    };
    Ok(source)
}
