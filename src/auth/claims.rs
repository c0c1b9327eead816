use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::users::repo_types::UserRole;

/// JWT payload carried by session tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: Uuid,      // user ID
    pub email: String,  // email at issue time
    pub role: UserRole, // role at issue time; changes apply on next login
    pub iat: usize,     // issued at (unix timestamp)
    pub exp: usize,     // expires at (unix timestamp)
    pub iss: String,    // issuer
    pub aud: String,    // audience
}
