//! Accomplishment history reconciliation

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashSet;

use crate::db::schemas::{lenient, Accomplishment};

/// Percentages and free text submitted with a project save
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccomplishmentInput {
    #[serde(with = "lenient::date")]
    pub date: Option<NaiveDate>,
    #[serde(deserialize_with = "lenient::number")]
    pub percent: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub prev_percent: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub planned_percent: f64,
    #[serde(deserialize_with = "lenient::string")]
    pub activities: String,
    #[serde(deserialize_with = "lenient::string")]
    pub issue: String,
    #[serde(deserialize_with = "lenient::string")]
    pub action: String,
    #[serde(deserialize_with = "lenient::string")]
    pub remarks: String,
}

impl AccomplishmentInput {
    /// Build the stored snapshot, dating it `today` when no date was given
    pub fn into_entry(self, today: NaiveDate) -> Accomplishment {
        Accomplishment {
            date: Some(self.date.unwrap_or(today)),
            percent: self.percent,
            prev_percent: self.prev_percent,
            planned_percent: self.planned_percent,
            variance: variance(self.percent, self.planned_percent),
            activities: self.activities,
            issue: self.issue,
            action: self.action,
            remarks: self.remarks,
        }
    }
}

/// Round half away from zero to two decimals
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Actual minus planned percent, to two decimals
pub fn variance(percent: f64, planned_percent: f64) -> f64 {
    round2(percent - planned_percent)
}

/// Outcome of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Replaced(usize),
    Appended,
}

/// Replace the snapshot sharing `entry`'s date, or append it.
///
/// Only the incoming entry's variance is recomputed; existing entries are
/// left as stored.
pub fn upsert(list: &mut Vec<Accomplishment>, mut entry: Accomplishment) -> Upsert {
    entry.variance = variance(entry.percent, entry.planned_percent);
    match list.iter().position(|a| a.date == entry.date) {
        Some(idx) => {
            list[idx] = entry;
            Upsert::Replaced(idx)
        }
        None => {
            list.push(entry);
            Upsert::Appended
        }
    }
}

/// Entry with the latest date. Ties keep the earliest in list order and
/// undated entries rank below any dated one.
pub fn latest(list: &[Accomplishment]) -> Option<&Accomplishment> {
    list.iter().fold(None, |best: Option<&Accomplishment>, a| match best {
        Some(b) if b.date >= a.date => Some(b),
        _ => Some(a),
    })
}

/// Percent to date of the latest snapshot, used as the next `prevPercent`
pub fn previous_percent(list: &[Accomplishment]) -> f64 {
    latest(list).map(|a| a.percent).unwrap_or(0.0)
}

/// Newest first with exact duplicates removed, for display and export
pub fn history_view(list: &[Accomplishment]) -> Vec<Accomplishment> {
    let mut sorted = list.to_vec();
    sorted.sort_by(|a, b| b.date.cmp(&a.date));

    let mut seen = HashSet::new();
    sorted
        .into_iter()
        .filter(|a| seen.insert(dedup_key(a)))
        .collect()
}

fn dedup_key(a: &Accomplishment) -> String {
    let date = a
        .date
        .map(|d| d.format(lenient::DATE_FORMAT).to_string())
        .unwrap_or_default();
    format!(
        "{}|{}|{}|{}|{}|{}|{}|{}",
        date,
        a.percent,
        a.prev_percent,
        a.planned_percent,
        a.activities,
        a.issue,
        a.action,
        a.remarks
    )
}
