//! Shared types for sitetrack

pub mod error;

pub use error::{Result, SitetrackError};
