use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of an asynchronous fetch job. Terminal states are final; the
/// archive store's polling loop is the only mutator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Running,
    Completed,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Handle for an in-progress or completed retrieval job against an
/// archive-backed store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub store_name: String,
    pub product_uuid: Uuid,
    pub job_id: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status_message: Option<String>,
}

impl Order {
    pub fn running(store_name: impl Into<String>, product_uuid: Uuid, job_id: impl Into<String>) -> Self {
        Self {
            store_name: store_name.into(),
            product_uuid,
            job_id: job_id.into(),
            status: OrderStatus::Running,
            created_at: Utc::now(),
            completed_at: None,
            status_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
