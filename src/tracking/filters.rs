//! List filters used by the dashboard tables

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeSet;

use super::status::{derive_status, ProjectStatus};
use crate::db::schemas::{Deepwell, Project, Reforestation};

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

fn normalized(q: &Option<String>) -> Option<String> {
    q.as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

fn selected(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Project table filter (`?q=&agency=&status=`)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectFilter {
    pub q: Option<String>,
    pub agency: Option<String>,
    pub status: Option<String>,
}

impl ProjectFilter {
    /// "On-going" also matches delayed projects, which are still in progress
    pub fn matches(&self, project: &Project, today: NaiveDate) -> bool {
        if let Some(q) = normalized(&self.q) {
            if !contains_ci(&project.name, &q) && !contains_ci(&project.contractor, &q) {
                return false;
            }
        }

        if let Some(agency) = selected(&self.agency) {
            if project.implementing_agency != agency {
                return false;
            }
        }

        if let Some(wanted) = selected(&self.status).and_then(ProjectStatus::parse) {
            let actual = derive_status(project, today);
            let ok = match wanted {
                ProjectStatus::OnGoing => {
                    matches!(actual, ProjectStatus::OnGoing | ProjectStatus::Delayed)
                }
                other => actual == other,
            };
            if !ok {
                return false;
            }
        }

        true
    }

    pub fn apply<'a>(&self, projects: &'a [Project], today: NaiveDate) -> Vec<&'a Project> {
        projects.iter().filter(|p| self.matches(p, today)).collect()
    }
}

/// Unique non-empty implementing agencies, sorted
pub fn agencies(projects: &[Project]) -> Vec<String> {
    projects
        .iter()
        .map(|p| p.implementing_agency.trim())
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Deepwell table filter (`?q=&provider=&status=`)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeepwellFilter {
    pub q: Option<String>,
    pub provider: Option<String>,
    pub status: Option<String>,
}

impl DeepwellFilter {
    pub fn matches(&self, well: &Deepwell) -> bool {
        if let Some(provider) = selected(&self.provider) {
            if well.provider != provider {
                return false;
            }
        }
        if let Some(status) = selected(&self.status) {
            if well.status != status {
                return false;
            }
        }
        if let Some(q) = normalized(&self.q) {
            let hit = contains_ci(&well.name, &q)
                || contains_ci(&well.provider, &q)
                || contains_ci(&well.permit, &q);
            if !hit {
                return false;
            }
        }
        true
    }

    pub fn apply<'a>(&self, wells: &'a [Deepwell]) -> Vec<&'a Deepwell> {
        wells.iter().filter(|w| self.matches(w)).collect()
    }
}

/// Reforestation table filter (`?q=&type=&status=`)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReforestationFilter {
    pub q: Option<String>,
    #[serde(rename = "type")]
    pub activity_type: Option<String>,
    pub status: Option<String>,
}

impl ReforestationFilter {
    pub fn matches(&self, activity: &Reforestation) -> bool {
        if let Some(q) = normalized(&self.q) {
            if !contains_ci(&activity.activity_name, &q) && !contains_ci(&activity.location, &q) {
                return false;
            }
        }
        if let Some(kind) = selected(&self.activity_type) {
            if activity.activity_type != kind {
                return false;
            }
        }
        if let Some(status) = selected(&self.status) {
            if activity.activity_status != status {
                return false;
            }
        }
        true
    }

    pub fn apply<'a>(&self, activities: &'a [Reforestation]) -> Vec<&'a Reforestation> {
        activities.iter().filter(|a| self.matches(a)).collect()
    }
}
