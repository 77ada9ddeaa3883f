use chrono::{DateTime, Utc};

/// Sentinel used when the page title carries no model number.
pub const MODEL_NUMBER_NA: &str = "NA";

/// One price observation, immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRecord {
    pub name: String,
    pub price: u64,
    pub url: String,
    pub model_number: String,
    pub observed_at: DateTime<Utc>,
}

impl ProductRecord {
    /// `observed_at` is stamped here, at construction time, once per record.
    pub fn new(
        name: impl Into<String>,
        price: u64,
        url: impl Into<String>,
        model_number: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            price,
            url: url.into(),
            model_number: model_number.into(),
            observed_at: Utc::now(),
        }
    }
}
