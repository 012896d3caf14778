//! Site inspection report values for a project

use chrono::NaiveDate;
use std::collections::HashMap;

use super::template::TemplateData;
use crate::db::schemas::{lenient::DATE_FORMAT, Accomplishment, Project};
use crate::tracking::text::{format_number, format_percent, format_peso, format_peso_opt, or_na};
use crate::tracking::{derive_status, latest};

/// Name of the accomplishment table section
pub const ACCOMPLISHMENT_LOOP: &str = "accomplishments";

fn date_or_na(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format(DATE_FORMAT).to_string())
        .unwrap_or_else(|| or_na(""))
}

fn duration_text(project: &Project) -> String {
    let mut text = format!("{} days", format_number(project.original_duration));
    if project.time_extension != 0.0 {
        text.push_str(&format!(" +{}", format_number(project.time_extension)));
    }
    text
}

fn accomplishment_row(entry: &Accomplishment, project: &Project) -> HashMap<String, String> {
    let issue = if entry.issue.trim().is_empty() {
        &project.issues
    } else {
        &entry.issue
    };
    HashMap::from([
        ("date".to_string(), date_or_na(entry.date)),
        ("plannedPercent".to_string(), format_percent(entry.planned_percent)),
        ("prevPercent".to_string(), format_percent(entry.prev_percent)),
        ("percent".to_string(), format_percent(entry.percent)),
        ("variance".to_string(), format_percent(entry.variance)),
        ("activities".to_string(), or_na(&entry.activities)),
        ("issue".to_string(), or_na(issue)),
        ("action".to_string(), or_na(&entry.action)),
        ("remarks".to_string(), or_na(&entry.remarks)),
    ])
}

/// Placeholder values and the accomplishment rows, in stored order
pub fn report_data(project: &Project, today: NaiveDate) -> TemplateData {
    let empty = Accomplishment::default();
    let last = latest(&project.accomplishments).unwrap_or(&empty);
    let mut data = TemplateData::default();

    data.set("ProjectName", or_na(&project.name));
    data.set("ImplementingAgency", or_na(&project.implementing_agency));
    data.set("Contractor", or_na(&project.contractor));
    data.set("Location", or_na(&project.location));
    data.set("ContractAmount", format_peso(project.contract_amount));
    data.set(
        "RevisedContractAmount",
        format_peso_opt(project.revised_contract_amount),
    );
    data.set("Status", derive_status(project, today).as_str());

    data.set("NTP", date_or_na(project.ntp_date));
    data.set("Duration", duration_text(project));
    data.set(
        "TargetCompletion",
        date_or_na(project.revised_completion.or(project.original_completion)),
    );
    data.set("TimeExtension", format_number(project.time_extension));
    data.set("OriginalTargetCompletion", date_or_na(project.original_completion));
    data.set("RevisedTargetCompletion", date_or_na(project.revised_completion));

    data.set("PercentToDate", format_percent(last.percent));
    data.set("PercentPlanned", format_percent(last.planned_percent));
    data.set("PercentPrevious", format_percent(last.prev_percent));
    data.set("AsOfDate", date_or_na(last.date));
    data.set("Variance", format_percent(last.percent - last.planned_percent));

    let issues = or_na(&project.issues);
    data.set("Issues", issues.clone());
    data.set("Issue", issues);
    let action = or_na(&last.action);
    data.set("Actions", action.clone());
    data.set("ActionTaken", action);
    data.set("Remarks", or_na(&project.remarks));
    let other = or_na(&project.other_details);
    data.set("OtherDetails", other.clone());
    data.set("OtherProjectDetails", other);
    data.set("Activities", or_na(&last.activities));

    let rows = project
        .accomplishments
        .iter()
        .map(|a| accomplishment_row(a, project))
        .collect();
    data.loops.insert(ACCOMPLISHMENT_LOOP.to_string(), rows);

    data
}

/// Safe download name, e.g. `Seawall_Phase_2.pdf`
pub fn export_filename(project_name: &str, extension: &str) -> String {
    let base = if project_name.is_empty() {
        "site_inspection_report".to_string()
    } else {
        project_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | ' ' | '_' | '(' | ')' | '+') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    };
    format!("{}.{}", base, extension)
}
