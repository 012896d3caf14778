//! Authentication and authorization for sitetrack
//!
//! Provides:
//! - Account signup, approval and login
//! - JWT token generation and validation
//! - Roles and the operation whitelist
//! - Password hashing with Argon2

pub mod accounts;
pub mod jwt;
pub mod password;
pub mod permissions;

pub use accounts::{LoginRequest, SignupRequest};
pub use jwt::{
    extract_token_from_header, extract_token_from_query, Claims, JwtValidator, TokenInput,
    TokenValidationResult,
};
pub use password::{hash_password, verify_password};
pub use permissions::{get_required_role, is_operation_allowed, Role};
