use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::preferences::Preferences;

/// Identifier of the authenticated user, as issued by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub String);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Bearer token. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Profile returned by the identity service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(alias = "_id")]
    pub id: IdentityId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub preferences: Option<Preferences>,
}

/// Successful login or registration.
#[derive(Debug, Clone)]
pub struct AuthGrant {
    pub credential: Credential,
    pub profile: Profile,
}

#[derive(Clone, Serialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Clone, Serialize)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

/// The authenticated session. Identity and credential always travel together.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub identity_id: IdentityId,
    pub display_name: String,
    pub email: String,
    pub credential: Credential,
    pub preferences: Option<Preferences>,
}

impl Session {
    pub fn new(credential: Credential, profile: Profile) -> Self {
        Self {
            identity_id: profile.id,
            display_name: profile.name,
            email: profile.email,
            credential,
            preferences: profile.preferences,
        }
    }

    /// Profile view of this session, as persisted next to the credential.
    pub fn profile(&self) -> Profile {
        Profile {
            id: self.identity_id.clone(),
            name: self.display_name.clone(),
            email: self.email.clone(),
            preferences: self.preferences.clone(),
        }
    }
}
