//! User account and business profile.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownVariant;

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    User,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::User => "USER",
            Role::Viewer => "VIEWER",
        }
    }

    /// Admins and regular users may create, change and delete records.
    pub fn can_edit(&self) -> bool {
        matches!(self, Role::Admin | Role::User)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Role::Admin),
            "USER" => Ok(Role::User),
            "VIEWER" => Ok(Role::Viewer),
            other => Err(UnknownVariant::new("role", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registered user. Serializes as the public profile.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "id")]
    pub user_id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub business_name: String,
    pub business_id: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub role: String,
    pub logo: Option<String>,
    pub vat_rate: Decimal,
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Parsed role. Rows are constrained by a CHECK, so an unknown value
    /// only appears if the schema drifts; treat it as the least privileged.
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or(Role::Viewer)
    }
}

/// Business details printed on documents.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BusinessProfile {
    pub business_name: String,
    pub business_id: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: String,
    pub logo: Option<String>,
}

/// Input for creating a user.
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub email: String,
    pub password_hash: String,
    pub business_name: String,
    pub business_id: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub vat_rate: Decimal,
}

/// Profile changes; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct UpdateProfile {
    pub business_name: Option<String>,
    pub business_id: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub logo: Option<String>,
    pub vat_rate: Option<Decimal>,
}

/// Normalize an email for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewers_cannot_edit() {
        assert!(Role::Admin.can_edit());
        assert!(Role::User.can_edit());
        assert!(!Role::Viewer.can_edit());
        assert!(!Role::User.is_admin());
    }

    #[test]
    fn role_parses_stored_values() {
        assert_eq!("ADMIN".parse::<Role>().unwrap(), Role::Admin);
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn role_serializes_screaming_case() {
        assert_eq!(serde_json::to_string(&Role::Viewer).unwrap(), "\"VIEWER\"");
    }

    #[test]
    fn email_is_trimmed_and_lowercased() {
        assert_eq!(normalize_email("  Dana@Example.COM "), "dana@example.com");
    }

    #[test]
    fn profile_json_hides_password_and_timestamps() {
        let user = User {
            user_id: Uuid::new_v4(),
            email: "dana@example.com".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            business_name: "Dana Design".to_string(),
            business_id: None,
            address: None,
            phone: None,
            role: "USER".to_string(),
            logo: None,
            vat_rate: Decimal::from(17),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("createdAt").is_none());
        assert_eq!(json["businessName"], "Dana Design");
        assert_eq!(json["id"], user.user_id.to_string());
        assert_eq!(json["vatRate"], 17.0);
    }
}
