use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A simple catalog item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}
