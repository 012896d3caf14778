//! Construction project document schema

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::history::EditEntry;
use super::lenient;

/// Collection name for projects
pub const PROJECT_COLLECTION: &str = "projects";

/// Maximum photos kept per project
pub const MAX_PHOTOS: usize = 3;

/// Construction project stored in the `projects` collection
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Project {
    pub id: String,
    #[serde(deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(deserialize_with = "lenient::string")]
    pub implementing_agency: String,
    #[serde(deserialize_with = "lenient::string")]
    pub location: String,
    #[serde(deserialize_with = "lenient::string")]
    pub contractor: String,
    #[serde(deserialize_with = "lenient::number")]
    pub contract_amount: f64,
    #[serde(
        deserialize_with = "lenient::opt_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub revised_contract_amount: Option<f64>,
    #[serde(deserialize_with = "lenient::string")]
    pub contract_docs_link: String,
    #[serde(with = "lenient::date")]
    pub ntp_date: Option<NaiveDate>,
    /// Contract duration in calendar days
    #[serde(deserialize_with = "lenient::number")]
    pub original_duration: f64,
    /// Granted time extension in calendar days
    #[serde(deserialize_with = "lenient::number")]
    pub time_extension: f64,
    #[serde(with = "lenient::date")]
    pub original_completion: Option<NaiveDate>,
    #[serde(with = "lenient::date")]
    pub revised_completion: Option<NaiveDate>,
    #[serde(deserialize_with = "lenient::string")]
    pub activities: String,
    #[serde(deserialize_with = "lenient::string")]
    pub issues: String,
    #[serde(deserialize_with = "lenient::string")]
    pub remarks: String,
    #[serde(deserialize_with = "lenient::string")]
    pub other_details: String,
    pub progress_billing: Vec<BillingEntry>,
    pub history: Vec<EditEntry>,
    pub photos: Vec<String>,
    /// Single photo written by early dashboard builds
    #[serde(rename = "sCurveDataUrl", skip_serializing_if = "Option::is_none")]
    pub s_curve_data_url: Option<String>,
    pub accomplishments: Vec<Accomplishment>,
}

/// Dated progress snapshot
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Accomplishment {
    #[serde(with = "lenient::date")]
    pub date: Option<NaiveDate>,
    #[serde(deserialize_with = "lenient::number")]
    pub percent: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub prev_percent: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub planned_percent: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub variance: f64,
    #[serde(deserialize_with = "lenient::string")]
    pub activities: String,
    #[serde(deserialize_with = "lenient::string")]
    pub issue: String,
    #[serde(deserialize_with = "lenient::string")]
    pub action: String,
    #[serde(deserialize_with = "lenient::string")]
    pub remarks: String,
}

/// Progress billing line
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct BillingEntry {
    #[serde(with = "lenient::date")]
    pub date: Option<NaiveDate>,
    #[serde(deserialize_with = "lenient::number")]
    pub amount: f64,
    #[serde(deserialize_with = "lenient::string")]
    pub desc: String,
}

impl BillingEntry {
    /// Entries without both a date and an amount are dropped on save
    pub fn is_complete(&self) -> bool {
        self.date.is_some() && self.amount != 0.0
    }
}

impl Project {
    /// Photos to show, falling back to the legacy single photo
    pub fn display_photos(&self) -> Vec<String> {
        if !self.photos.is_empty() {
            return self.photos.iter().take(MAX_PHOTOS).cloned().collect();
        }
        self.s_curve_data_url
            .iter()
            .filter(|p| !p.is_empty())
            .cloned()
            .collect()
    }
}
