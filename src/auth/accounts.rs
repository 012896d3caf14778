//! Account lifecycle: signup, login, approval and access levels
//!
//! New accounts start unapproved and cannot log in until an admin approves
//! them. The administrator is whoever signs up with the configured admin
//! email; that account is approved on creation.

use serde::Deserialize;
use tracing::info;

use super::password::{hash_password, verify_password, MIN_PASSWORD_LEN};
use super::permissions::Role;
use crate::db::schemas::{UserDoc, UserSummary};
use crate::store::{load, load_all, new_id, save, Collection, DocumentStore};
use crate::types::{Result, SitetrackError};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    let valid = email
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
        .unwrap_or(false);
    if !valid {
        return Err(SitetrackError::Validation("A valid email is required".into()));
    }
    Ok(email)
}

/// Role granted to a stored user
pub fn role_for(user: &UserDoc, admin_email: &str) -> Role {
    if user.email.eq_ignore_ascii_case(admin_email) {
        Role::Admin
    } else {
        Role::from_access_level(user.access_level)
    }
}

pub async fn find_by_email(store: &dyn DocumentStore, email: &str) -> Result<Option<UserDoc>> {
    let email = email.trim().to_lowercase();
    let users: Vec<UserDoc> = load_all(store).await?;
    Ok(users.into_iter().find(|u| u.email == email))
}

/// Create an account awaiting approval
pub async fn signup(
    store: &dyn DocumentStore,
    admin_email: &str,
    request: SignupRequest,
) -> Result<UserDoc> {
    let email = normalize_email(&request.email)?;

    if request.password != request.confirm_password {
        return Err(SitetrackError::Validation("Passwords do not match".into()));
    }
    if request.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(SitetrackError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if find_by_email(store, &email).await?.is_some() {
        return Err(SitetrackError::Conflict("Email already registered".into()));
    }

    let mut user = UserDoc::new(new_id(), &email, hash_password(&request.password)?);
    if email.eq_ignore_ascii_case(admin_email) {
        user.approved = true;
    }
    save(store, &user).await?;

    info!("New account {} (approved: {})", user.email, user.approved);
    Ok(user)
}

/// Check credentials; unapproved accounts are refused
pub async fn login(
    store: &dyn DocumentStore,
    admin_email: &str,
    request: LoginRequest,
) -> Result<(UserDoc, Role)> {
    let invalid = || SitetrackError::Unauthorized("Invalid email or password".into());

    let user = find_by_email(store, &request.email).await?.ok_or_else(invalid)?;
    if user.password_hash.is_empty() || !verify_password(&request.password, &user.password_hash)? {
        return Err(invalid());
    }

    let role = role_for(&user, admin_email);
    if !user.approved && role != Role::Admin {
        return Err(SitetrackError::Forbidden(
            "Your account is pending approval".into(),
        ));
    }
    Ok((user, role))
}

async fn require_user(store: &dyn DocumentStore, id: &str) -> Result<UserDoc> {
    load::<UserDoc>(store, id)
        .await?
        .ok_or_else(|| SitetrackError::NotFound(format!("User {}", id)))
}

/// Approve a pending account at access level 1
pub async fn approve(store: &dyn DocumentStore, id: &str) -> Result<UserDoc> {
    let mut user = require_user(store, id).await?;
    user.approved = true;
    user.access_level = 1;
    save(store, &user).await?;
    Ok(user)
}

/// Reject a pending account by deleting it
pub async fn reject(store: &dyn DocumentStore, id: &str) -> Result<()> {
    if store.delete(Collection::Users, id).await?.is_none() {
        return Err(SitetrackError::NotFound(format!("User {}", id)));
    }
    Ok(())
}

pub async fn set_access_level(store: &dyn DocumentStore, id: &str, level: u8) -> Result<UserDoc> {
    if !matches!(level, 1 | 2) {
        return Err(SitetrackError::Validation(
            "Access level must be 1 or 2".into(),
        ));
    }
    let mut user = require_user(store, id).await?;
    user.access_level = level;
    save(store, &user).await?;
    Ok(user)
}

/// Users filtered by approval state, oldest first
pub async fn list_users(store: &dyn DocumentStore, approved: Option<bool>) -> Result<Vec<UserSummary>> {
    let mut users: Vec<UserDoc> = load_all(store).await?;
    users.retain(|u| approved.map_or(true, |a| u.approved == a));
    users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(users.iter().map(UserSummary::from).collect())
}

/// Approved users other than `me`, for the chat contact list
pub async fn contacts(store: &dyn DocumentStore, me: &str) -> Result<Vec<UserSummary>> {
    let mut users: Vec<UserDoc> = load_all(store).await?;
    users.retain(|u| u.approved && u.id != me);
    users.sort_by(|a, b| a.email.cmp(&b.email));
    Ok(users.iter().map(UserSummary::from).collect())
}
