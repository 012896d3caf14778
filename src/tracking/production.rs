//! Deepwell production statistics

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

use super::accomplishment::round2;
use crate::db::schemas::{Deepwell, MonthlyProduction};

/// Providers charted side by side
pub const CHARTED_PROVIDERS: [&str; 2] = ["MWCI", "MWSI"];

/// Rows that carry both a month and a non-zero production figure
pub fn clean_months(months: Vec<MonthlyProduction>) -> Vec<MonthlyProduction> {
    months
        .into_iter()
        .map(|m| MonthlyProduction {
            month: m.month.trim().to_string(),
            prod: m.prod,
        })
        .filter(|m| !m.month.is_empty() && m.prod != 0.0 && m.prod.is_finite())
        .collect()
}

/// Total and average monthly production, rounded to two decimals
pub fn production_stats(months: &[MonthlyProduction]) -> (f64, f64) {
    let total: f64 = months.iter().map(|m| m.prod).sum();
    let avg = if months.is_empty() {
        0.0
    } else {
        total / months.len() as f64
    };
    (round2(total), round2(avg))
}

/// Recompute the derived totals on a deepwell before saving
pub fn apply_stats(well: &mut Deepwell) {
    let (total, avg) = production_stats(&well.months);
    well.total_prod = total;
    well.avg_prod = avg;
}

/// `2024-01` becomes `Jan 2024`; anything unparseable is returned as is
pub fn month_label(key: &str) -> String {
    match NaiveDate::parse_from_str(&format!("{}-01", key.get(..7).unwrap_or(key)), "%Y-%m-%d") {
        Ok(d) => d.format("%b %Y").to_string(),
        Err(_) => key.to_string(),
    }
}

/// Monthly totals per charted provider
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MonthlyTotals {
    pub months: Vec<String>,
    pub labels: Vec<String>,
    pub mwci: Vec<f64>,
    pub mwsi: Vec<f64>,
    #[serde(rename = "hasData")]
    pub has_data: bool,
}

pub fn monthly_by_provider(wells: &[Deepwell]) -> MonthlyTotals {
    let mut by_provider: [BTreeMap<String, f64>; 2] = Default::default();

    for well in wells {
        let provider = well.provider.trim().to_uppercase();
        let Some(slot) = CHARTED_PROVIDERS.iter().position(|p| *p == provider) else {
            continue;
        };
        for m in &well.months {
            if m.month.is_empty() || !m.prod.is_finite() {
                continue;
            }
            *by_provider[slot].entry(m.month.clone()).or_insert(0.0) += m.prod;
        }
    }

    let months: Vec<String> = by_provider[0]
        .keys()
        .chain(by_provider[1].keys())
        .cloned()
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    let series = |slot: usize| -> Vec<f64> {
        months
            .iter()
            .map(|k| by_provider[slot].get(k).copied().unwrap_or(0.0))
            .collect()
    };

    MonthlyTotals {
        labels: months.iter().map(|m| month_label(m)).collect(),
        mwci: series(0),
        mwsi: series(1),
        has_data: !months.is_empty(),
        months,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn month(key: &str, prod: f64) -> MonthlyProduction {
        MonthlyProduction {
            month: key.into(),
            prod,
        }
    }

    #[test]
    fn test_clean_months_drops_blank_and_zero() {
        let cleaned = clean_months(vec![month("2024-01", 10.0), month("", 5.0), month("2024-02", 0.0)]);
        assert_eq!(cleaned, vec![month("2024-01", 10.0)]);
    }

    #[test]
    fn test_stats() {
        let months = vec![month("2024-01", 10.0), month("2024-02", 20.0), month("2024-03", 5.0)];
        assert_eq!(production_stats(&months), (35.0, 11.67));
        assert_eq!(production_stats(&[]), (0.0, 0.0));
    }

    #[test]
    fn test_month_label() {
        assert_eq!(month_label("2024-01"), "Jan 2024");
        assert_eq!(month_label("2023-12"), "Dec 2023");
        assert_eq!(month_label("garbage"), "garbage");
    }

    #[test]
    fn test_monthly_by_provider() {
        let wells = vec![
            Deepwell {
                provider: "mwci".into(),
                months: vec![month("2024-02", 5.0), month("2024-01", 3.0)],
                ..Default::default()
            },
            Deepwell {
                provider: "MWCI".into(),
                months: vec![month("2024-01", 2.0)],
                ..Default::default()
            },
            Deepwell {
                provider: "MWSI".into(),
                months: vec![month("2024-03", 7.0)],
                ..Default::default()
            },
            Deepwell {
                provider: "Other".into(),
                months: vec![month("2023-01", 100.0)],
                ..Default::default()
            },
        ];
        let totals = monthly_by_provider(&wells);
        assert_eq!(totals.months, vec!["2024-01", "2024-02", "2024-03"]);
        assert_eq!(totals.labels[0], "Jan 2024");
        assert_eq!(totals.mwci, vec![5.0, 5.0, 0.0]);
        assert_eq!(totals.mwsi, vec![0.0, 0.0, 7.0]);
        assert!(totals.has_data);
    }
}
