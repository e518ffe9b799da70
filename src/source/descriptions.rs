use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{ManagerError, Result};
use crate::scheduler::job::{JobPayload, MapDescription};
use crate::source::{Batch, JobSource};

/// Resolves map legend ids to their description text.
#[async_trait]
pub trait DescriptionLookup: Send + Sync {
    /// Ids with no description are absent from the result.
    async fn fetch_descriptions(&self, legend_ids: &[u64]) -> Result<HashMap<u64, String>>;
}

#[derive(Debug, Deserialize)]
struct LegendRow {
    legend_id: u64,
    #[serde(default)]
    descrip: Option<String>,
}

/// Client for the `/legend` endpoint of the map metadata API.
#[derive(Debug, Clone)]
pub struct MacrostratClient {
    http: reqwest::Client,
    legend_url: String,
}

impl MacrostratClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            legend_url: format!("{}/legend", base_url.trim_end_matches('/')),
        })
    }

    /// One page of described legends, ordered by id.
    pub async fn fetch_page(&self, limit: usize, offset: usize) -> Result<Vec<MapDescription>> {
        let rows: Vec<LegendRow> = self
            .http
            .get(&self.legend_url)
            .query(&[
                ("select", "legend_id,descrip".to_string()),
                ("order", "legend_id.asc".to_string()),
                ("descrip", "not.is.null".to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| MapDescription {
                legend_id: row.legend_id,
                text: row.descrip.unwrap_or_default(),
            })
            .collect())
    }
}

#[async_trait]
impl DescriptionLookup for MacrostratClient {
    async fn fetch_descriptions(&self, legend_ids: &[u64]) -> Result<HashMap<u64, String>> {
        if legend_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<String> = legend_ids.iter().map(|id| id.to_string()).collect();

        let rows: Vec<LegendRow> = self
            .http
            .get(&self.legend_url)
            .query(&[
                ("select", "legend_id,descrip".to_string()),
                ("descrip", "not.is.null".to_string()),
                ("legend_id", format!("in.({})", ids.join(","))),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.descrip.map(|text| (row.legend_id, text)))
            .collect())
    }
}

/// Pages through every described legend. The offset is the row offset.
#[derive(Debug)]
pub struct DescriptionSource {
    client: MacrostratClient,
    offset: usize,
}

impl DescriptionSource {
    pub fn new(client: MacrostratClient) -> Self {
        Self { client, offset: 0 }
    }
}

#[async_trait]
impl JobSource for DescriptionSource {
    async fn init(&mut self, offset: &str) -> Result<()> {
        self.offset = if offset.is_empty() {
            0
        } else {
            offset.parse().map_err(|_| {
                ManagerError::Source(format!("invalid description offset '{}'", offset))
            })?
        };
        Ok(())
    }

    async fn next_batch(&mut self, size: usize) -> Result<Batch> {
        let descriptions = self.client.fetch_page(size, self.offset).await?;
        self.offset += descriptions.len();
        let last = descriptions.len() < size;

        Ok(Batch {
            payload: JobPayload::MapDescriptions(descriptions),
            last,
        })
    }

    fn offset(&self) -> String {
        self.offset.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legend_url_strips_trailing_slash() {
        let client = MacrostratClient::new("https://example.org/api/pg/").unwrap();
        assert_eq!(client.legend_url, "https://example.org/api/pg/legend");
    }

    #[test]
    fn legend_row_tolerates_null_description() {
        let rows: Vec<LegendRow> =
            serde_json::from_str(r#"[{"legend_id": 3, "descrip": null}, {"legend_id": 4}]"#)
                .unwrap();
        assert!(rows.iter().all(|r| r.descrip.is_none()));
    }

    #[tokio::test]
    async fn init_parses_numeric_offset() {
        let mut source = DescriptionSource::new(MacrostratClient::new("http://localhost").unwrap());
        source.init("250").await.unwrap();
        assert_eq!(source.offset(), "250");
        assert!(source.init("next").await.is_err());
    }
}
