use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Sentinel handed out when no work is ready. Never leased.
    Wait,
    /// Produced by the gated producer and counted by the group barrier.
    Batch,
    /// Submitted directly, outside the group barrier.
    OnDemand,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Wait => write!(f, "wait"),
            JobKind::Batch => write!(f, "batch"),
            JobKind::OnDemand => write!(f, "on_demand"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapDescription {
    pub legend_id: u64,
    pub text: String,
}

/// Work content, defined by whoever produced the job. The lease manager never
/// looks inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPayload {
    Paragraphs(Vec<String>),
    MapDescriptions(Vec<MapDescription>),
    ParagraphIds(Vec<String>),
}

impl JobPayload {
    /// Number of items carried by this payload.
    pub fn len(&self) -> usize {
        match self {
            JobPayload::Paragraphs(items) => items.len(),
            JobPayload::MapDescriptions(items) => items.len(),
            JobPayload::ParagraphIds(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    pub kind: JobKind,
    pub payload: Option<JobPayload>,
}

impl Job {
    /// A job produced by the gated producer.
    pub fn batch(id: u64, payload: JobPayload) -> Self {
        Self {
            id,
            kind: JobKind::Batch,
            payload: Some(payload),
        }
    }

    /// A directly submitted job. Its id is assigned at dispatch.
    pub fn on_demand(payload: JobPayload) -> Self {
        Self {
            id: 0,
            kind: JobKind::OnDemand,
            payload: Some(payload),
        }
    }

    pub fn wait() -> Self {
        Self {
            id: 0,
            kind: JobKind::Wait,
            payload: None,
        }
    }

    pub fn is_wait(&self) -> bool {
        self.kind == JobKind::Wait
    }
}
