use async_trait::async_trait;

use crate::error::{ManagerError, Result};
use crate::scheduler::job::JobPayload;
use crate::source::{Batch, JobSource};

/// Serves a fixed list of paragraphs. The offset is the index of the next item.
#[derive(Debug, Clone)]
pub struct FixtureSource {
    data: Vec<String>,
    next: usize,
}

impl Default for FixtureSource {
    fn default() -> Self {
        Self::new((1..=10).map(|i| format!("data{}", i)).collect())
    }
}

impl FixtureSource {
    pub fn new(data: Vec<String>) -> Self {
        Self { data, next: 0 }
    }
}

#[async_trait]
impl JobSource for FixtureSource {
    async fn init(&mut self, offset: &str) -> Result<()> {
        self.next = if offset.is_empty() {
            0
        } else {
            offset
                .parse()
                .map_err(|_| ManagerError::Source(format!("invalid fixture offset '{}'", offset)))?
        };
        Ok(())
    }

    async fn next_batch(&mut self, size: usize) -> Result<Batch> {
        let start = self.next.min(self.data.len());
        let end = (start + size).min(self.data.len());
        self.next = end;

        Ok(Batch {
            payload: JobPayload::Paragraphs(self.data[start..end].to_vec()),
            last: end >= self.data.len(),
        })
    }

    fn offset(&self) -> String {
        self.next.to_string()
    }
}
