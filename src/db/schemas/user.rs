//! User document schema
//!
//! Stores credentials, approval state and access level.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

/// User document stored in the `users` collection
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserDoc {
    pub id: String,

    /// Lowercased email, used as the login identifier
    pub email: String,

    /// Argon2 password hash
    #[serde(default)]
    pub password_hash: String,

    /// Whether an admin has approved the account
    #[serde(default)]
    pub approved: bool,

    /// 1 = member, 2 = elevated member
    #[serde(default = "default_access_level")]
    pub access_level: u8,

    pub created_at: DateTime<Utc>,
}

fn default_access_level() -> u8 {
    1
}

impl UserDoc {
    /// Create a new, unapproved user
    pub fn new(id: String, email: &str, password_hash: String) -> Self {
        Self {
            id,
            email: email.trim().to_lowercase(),
            password_hash,
            approved: false,
            access_level: 1,
            created_at: Utc::now(),
        }
    }
}

/// Public view of a user, without credentials
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub email: String,
    pub approved: bool,
    pub access_level: u8,
    pub created_at: DateTime<Utc>,
}

impl From<&UserDoc> for UserSummary {
    fn from(user: &UserDoc) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            approved: user.approved,
            access_level: user.access_level,
            created_at: user.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_is_pending() {
        let user = UserDoc::new("u1".into(), " Someone@Example.COM ", "hash".into());
        assert_eq!(user.email, "someone@example.com");
        assert!(!user.approved);
        assert_eq!(user.access_level, 1);
    }

    #[test]
    fn test_summary_omits_hash() {
        let user = UserDoc::new("u1".into(), "a@b.com", "secret-hash".into());
        let json = serde_json::to_string(&UserSummary::from(&user)).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(json.contains("accessLevel"));
    }
}
