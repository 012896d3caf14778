//! Business rules for projects and deepwells
//!
//! Pure functions over the stored documents: status derivation,
//! accomplishment reconciliation, table filters, production statistics
//! and display formatting.

pub mod accomplishment;
pub mod filters;
pub mod production;
pub mod status;
pub mod text;

pub use accomplishment::{history_view, latest, upsert, variance, AccomplishmentInput, Upsert};
pub use filters::{agencies, DeepwellFilter, ProjectFilter, ReforestationFilter};
pub use production::{apply_stats, clean_months, monthly_by_provider, MonthlyTotals};
pub use status::{derive_status, ProjectStatus};

/// Today's date in UTC
pub fn today() -> chrono::NaiveDate {
    chrono::Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_today_is_utc_date() {
        let before = Utc::now().date_naive();
        let day = today();
        let after = Utc::now().date_naive();
        assert!(day == before || day == after);
    }
}
