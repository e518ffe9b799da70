use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::{ManagerError, Result};
use crate::scheduler::job::JobPayload;
use crate::source::{Batch, JobSource};

/// Only paragraphs tagged with this topic become jobs.
const TOPIC: &str = "geoarchive";

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<GraphQlData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlData {
    #[serde(rename = "Get")]
    get: GetData,
}

#[derive(Debug, Deserialize)]
struct GetData {
    #[serde(rename = "Paragraph", default)]
    paragraphs: Vec<ParagraphRow>,
}

#[derive(Debug, Deserialize)]
struct ParagraphRow {
    #[serde(rename = "_additional")]
    additional: Additional,
    #[serde(default)]
    topic_list: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct Additional {
    id: String,
}

/// Build the cursor query for one page of paragraphs.
fn paragraph_query(limit: usize, cursor: &str) -> String {
    let after = if cursor.is_empty() {
        String::new()
    } else {
        format!(", after: {}", serde_json::Value::String(cursor.to_string()))
    };
    format!(
        "{{ Get {{ Paragraph(limit: {}{}) {{ _additional {{ id }} topic_list }} }} }}",
        limit, after
    )
}

/// Walks the paragraph index with a cursor, keeping ids tagged with the
/// target topic. The offset is the id of the last paragraph seen.
#[derive(Debug)]
pub struct ParagraphSource {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    cursor: String,
}

impl ParagraphSource {
    pub fn new(scheme: &str, host: &str, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}://{}/v1/graphql", scheme, host),
            api_key,
            cursor: String::new(),
        })
    }

    async fn fetch_page(&self, limit: usize) -> Result<Vec<ParagraphRow>> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "query": paragraph_query(limit, &self.cursor) }));
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response: GraphQlResponse = request.send().await?.error_for_status()?.json().await?;
        if let Some(err) = response.errors.first() {
            return Err(ManagerError::Source(format!(
                "paragraph query failed: {}",
                err.message
            )));
        }
        Ok(response
            .data
            .map(|data| data.get.paragraphs)
            .unwrap_or_default())
    }
}

#[async_trait]
impl JobSource for ParagraphSource {
    async fn init(&mut self, offset: &str) -> Result<()> {
        self.cursor = offset.to_string();
        Ok(())
    }

    /// Keeps paging until `size` matching ids are collected or the index runs
    /// out. A batch may overshoot `size` by up to one page of matches.
    async fn next_batch(&mut self, size: usize) -> Result<Batch> {
        let mut ids = Vec::new();
        loop {
            let page = self.fetch_page(size).await?;
            let exhausted = page.len() < size;

            if let Some(row) = page.last() {
                self.cursor = row.additional.id.clone();
            }
            ids.extend(
                page.into_iter()
                    .filter(|row| {
                        row.topic_list
                            .as_deref()
                            .unwrap_or_default()
                            .iter()
                            .any(|topic| topic == TOPIC)
                    })
                    .map(|row| row.additional.id),
            );

            if exhausted || ids.len() >= size {
                return Ok(Batch {
                    payload: JobPayload::ParagraphIds(ids),
                    last: exhausted,
                });
            }
        }
    }

    fn offset(&self) -> String {
        self.cursor.clone()
    }
}
