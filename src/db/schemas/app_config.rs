//! Runtime configuration document (`config/app`)

use serde::{Deserialize, Serialize};

/// Collection name for runtime configuration
pub const CONFIG_COLLECTION: &str = "config";

/// Id of the single application config document
pub const APP_CONFIG_ID: &str = "app";

/// Admin-editable overrides of the CLI configuration
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfigDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_endpoint_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_url: Option<String>,
}
