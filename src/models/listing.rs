use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A local business listing (restaurant, cafe, bar, shop, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: i64,
    pub title: String,
    /// Decimal rating serialized as a string by the API, e.g. "4.5"
    #[serde(default)]
    pub rating: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    /// Free-form hours text, e.g. "Open until 23:00" or "Mon-Fri 9:00-18:00"
    #[serde(default)]
    pub open_time: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Listing {
    /// Rating parsed for sorting/display; `None` when absent or malformed.
    pub fn rating_value(&self) -> Option<f64> {
        self.rating.as_deref().and_then(|r| r.parse().ok())
    }
}
