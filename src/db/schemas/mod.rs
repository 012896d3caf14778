//! Document schemas for sitetrack
//!
//! Defines the stored shape of projects, deepwells, reforestation
//! activities, users, chat messages and the runtime config document.

mod app_config;
mod deepwell;
pub mod history;
pub mod lenient;
mod message;
mod project;
mod reforestation;
mod user;

pub use app_config::{AppConfigDoc, APP_CONFIG_ID, CONFIG_COLLECTION};
pub use deepwell::{Deepwell, MonthlyProduction, DEEPWELL_COLLECTION};
pub use history::{EditAction, EditEntry};
pub use message::{MessageDoc, MESSAGE_COLLECTION};
pub use project::{Accomplishment, BillingEntry, Project, MAX_PHOTOS, PROJECT_COLLECTION};
pub use reforestation::{Reforestation, REFORESTATION_COLLECTION};
pub use user::{UserDoc, UserSummary, USER_COLLECTION};
