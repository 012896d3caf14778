//! Reforestation activity document schema

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::history::EditEntry;
use super::lenient;

/// Collection name for reforestation activities
pub const REFORESTATION_COLLECTION: &str = "reforestations";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Reforestation {
    pub id: String,
    #[serde(deserialize_with = "lenient::string")]
    pub activity_name: String,
    #[serde(deserialize_with = "lenient::string")]
    pub activity_type: String,
    #[serde(deserialize_with = "lenient::string")]
    pub location: String,
    #[serde(deserialize_with = "lenient::string")]
    pub implementing_agency: String,
    /// Hectares
    #[serde(deserialize_with = "lenient::number")]
    pub target_area: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub trees_planted: f64,
    #[serde(deserialize_with = "lenient::string")]
    pub tree_species: String,
    #[serde(deserialize_with = "lenient::string")]
    pub activity_status: String,
    #[serde(with = "lenient::date")]
    pub start_date: Option<NaiveDate>,
    #[serde(with = "lenient::date")]
    pub target_date: Option<NaiveDate>,
    #[serde(deserialize_with = "lenient::number")]
    pub budget: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub initial_survival_rate: f64,
    #[serde(with = "lenient::date")]
    pub initial_survival_date: Option<NaiveDate>,
    #[serde(deserialize_with = "lenient::number")]
    pub final_survival_rate: f64,
    #[serde(with = "lenient::date")]
    pub final_survival_date: Option<NaiveDate>,
    #[serde(deserialize_with = "lenient::string")]
    pub description: String,
    #[serde(deserialize_with = "lenient::string")]
    pub remarks_reforestation: String,
    /// Last save, milliseconds since the epoch
    pub timestamp: i64,
    pub photos: Vec<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub kmz_name: String,
    #[serde(deserialize_with = "lenient::string")]
    pub kmz_data_url: String,
    pub history: Vec<EditEntry>,
}
