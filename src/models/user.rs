use std::fmt;

use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

/// Route-level authorization role, lowest privilege first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "Option<String>")]
pub enum Role {
    /// The default, lowest-privilege role.
    #[default]
    Employee,
    Manager,
    Administrator,
}

impl Role {
    /// Parses a role name. Unknown names yield `None`.
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "employee" => Some(Role::Employee),
            "manager" => Some(Role::Manager),
            "administrator" => Some(Role::Administrator),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Employee => "employee",
            Role::Manager => "manager",
            Role::Administrator => "administrator",
        }
    }
}

// Unrecognised or absent role names never grant more than `Employee`.
impl From<Option<String>> for Role {
    fn from(raw: Option<String>) -> Self {
        raw.as_deref().and_then(Role::parse).unwrap_or_default()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A weekly availability window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityPattern {
    /// 0 = Sunday ... 6 = Saturday.
    #[garde(range(max = 6))]
    pub day_of_week: u8,
    /// `HH:mm`
    #[garde(custom(validate_hhmm))]
    pub start_time: String,
    /// `HH:mm`
    #[garde(custom(validate_hhmm))]
    pub end_time: String,
    #[garde(skip)]
    pub is_available: bool,
}

fn validate_hhmm(value: &str, _ctx: &()) -> garde::Result {
    let valid = value
        .split_once(':')
        .and_then(|(h, m)| {
            if h.len() != 2 || m.len() != 2 {
                return None;
            }
            Some((h.parse::<u8>().ok()?, m.parse::<u8>().ok()?))
        })
        .is_some_and(|(h, m)| h < 24 && m < 60);

    if valid {
        Ok(())
    } else {
        Err(garde::Error::new("time must use the HH:mm format"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyContact {
    #[garde(length(min = 1, max = 100))]
    pub name: String,
    #[garde(length(max = 50))]
    pub relationship: String,
    #[garde(length(min = 3, max = 32))]
    pub phone_number: String,
}

/// The application's view of an authenticated person.
///
/// An immutable snapshot: the identity bridge or the backend produces a new
/// value rather than editing one in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub emergency_contact: Option<EmergencyContact>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default)]
    pub availability: Vec<AvailabilityPattern>,
}

fn default_active() -> bool {
    true
}

impl User {
    /// An active employee with no optional attributes.
    pub fn new(
        id: impl Into<String>,
        email: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            email: email.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            role: Role::Employee,
            department: None,
            skills: Vec::new(),
            phone_number: None,
            emergency_contact: None,
            is_active: true,
            created_at: now,
            updated_at: now,
            last_login: None,
            availability: Vec::new(),
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Partial profile edit sent to `PUT /users/me`.
///
/// Absent fields are left untouched by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(min = 1, max = 100))]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(min = 1, max = 100))]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(max = 100))]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(min = 3, max = 32))]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub skills: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(dive)]
    pub emergency_contact: Option<EmergencyContact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(dive)]
    pub availability: Option<Vec<AvailabilityPattern>>,
}
