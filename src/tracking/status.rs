//! Project status derivation

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::accomplishment::latest;
use crate::db::schemas::Project;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectStatus {
    #[serde(rename = "On-going")]
    OnGoing,
    Delayed,
    Completed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::OnGoing => "On-going",
            ProjectStatus::Delayed => "Delayed",
            ProjectStatus::Completed => "Completed",
        }
    }

    /// Parse a status filter value as shown in the dashboard
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "on-going" | "ongoing" => Some(ProjectStatus::OnGoing),
            "delayed" => Some(ProjectStatus::Delayed),
            "completed" => Some(ProjectStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a project as of `today`.
///
/// The latest-dated accomplishment decides first: 100% or more is
/// completed, behind plan is delayed. Otherwise the schedule decides: past
/// the revised completion date (or the original one when no revision
/// exists) is delayed.
pub fn derive_status(project: &Project, today: NaiveDate) -> ProjectStatus {
    if let Some(entry) = latest(&project.accomplishments) {
        if entry.percent >= 100.0 {
            return ProjectStatus::Completed;
        }
        if entry.percent < entry.planned_percent {
            return ProjectStatus::Delayed;
        }
    }

    let deadline = project.revised_completion.or(project.original_completion);
    match deadline {
        Some(deadline) if today > deadline => ProjectStatus::Delayed,
        _ => ProjectStatus::OnGoing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::Accomplishment;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn entry(d: NaiveDate, percent: f64, planned: f64) -> Accomplishment {
        Accomplishment {
            date: Some(d),
            percent,
            planned_percent: planned,
            ..Default::default()
        }
    }

    #[test]
    fn test_completed_uses_latest_entry_only() {
        let mut project = Project::default();
        project.accomplishments = vec![
            entry(date(2024, 3, 1), 100.0, 100.0),
            entry(date(2024, 1, 1), 40.0, 50.0),
        ];
        assert_eq!(derive_status(&project, date(2024, 3, 2)), ProjectStatus::Completed);

        // A later entry below 100 means not completed, regardless of list order
        project.accomplishments.push(entry(date(2024, 4, 1), 95.0, 90.0));
        assert_eq!(derive_status(&project, date(2024, 4, 2)), ProjectStatus::OnGoing);
    }

    #[test]
    fn test_behind_plan_is_delayed() {
        let mut project = Project::default();
        project.accomplishments = vec![entry(date(2024, 2, 1), 30.0, 35.5)];
        assert_eq!(derive_status(&project, date(2024, 2, 2)), ProjectStatus::Delayed);
    }

    #[test]
    fn test_no_accomplishments_uses_schedule() {
        let mut project = Project::default();
        assert_eq!(derive_status(&project, date(2030, 1, 1)), ProjectStatus::OnGoing);

        project.original_completion = Some(date(2024, 6, 30));
        assert_eq!(derive_status(&project, date(2024, 6, 30)), ProjectStatus::OnGoing);
        assert_eq!(derive_status(&project, date(2024, 7, 1)), ProjectStatus::Delayed);
    }

    #[test]
    fn test_revised_completion_takes_precedence() {
        let mut project = Project::default();
        project.original_completion = Some(date(2024, 6, 30));
        project.revised_completion = Some(date(2024, 9, 30));
        assert_eq!(derive_status(&project, date(2024, 8, 1)), ProjectStatus::OnGoing);
        assert_eq!(derive_status(&project, date(2024, 10, 1)), ProjectStatus::Delayed);
    }

    #[test]
    fn test_on_track_but_past_deadline() {
        let mut project = Project::default();
        project.original_completion = Some(date(2024, 1, 31));
        project.accomplishments = vec![entry(date(2024, 1, 15), 80.0, 80.0)];
        assert_eq!(derive_status(&project, date(2024, 2, 1)), ProjectStatus::Delayed);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&ProjectStatus::OnGoing).unwrap(), "\"On-going\"");
        assert_eq!(ProjectStatus::parse("ON-GOING"), Some(ProjectStatus::OnGoing));
        assert_eq!(ProjectStatus::parse("unknown"), None);
    }
}
