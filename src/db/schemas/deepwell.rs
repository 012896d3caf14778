//! Deepwell document schema

use serde::{Deserialize, Serialize};

use super::history::EditEntry;
use super::lenient;

/// Collection name for deepwells
pub const DEEPWELL_COLLECTION: &str = "deepwells";

/// Groundwater extraction well stored in the `deepwells` collection
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Deepwell {
    pub id: String,
    #[serde(deserialize_with = "lenient::string")]
    pub name: String,
    /// Water concessionaire, e.g. MWCI or MWSI
    #[serde(deserialize_with = "lenient::string")]
    pub provider: String,
    #[serde(deserialize_with = "lenient::string")]
    pub permit: String,
    #[serde(deserialize_with = "lenient::string")]
    pub status: String,
    #[serde(deserialize_with = "lenient::number")]
    pub rated_yield: f64,
    pub months: Vec<MonthlyProduction>,
    #[serde(deserialize_with = "lenient::number")]
    pub avg_prod: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub total_prod: f64,
    #[serde(deserialize_with = "lenient::string")]
    pub location: String,
    #[serde(deserialize_with = "lenient::string")]
    pub municipality: String,
    pub history: Vec<EditEntry>,
}

/// Production for one calendar month
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct MonthlyProduction {
    /// `YYYY-MM`
    #[serde(deserialize_with = "lenient::string")]
    pub month: String,
    #[serde(deserialize_with = "lenient::number")]
    pub prod: f64,
}
