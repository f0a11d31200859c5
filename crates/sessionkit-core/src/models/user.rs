use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The signed-in account. Identity is `id`; the record is replaced
/// wholesale on every profile update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(id: impl Into<String>, email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            name: name.into(),
            avatar: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Name to show in greetings, falling back to the email's local part
    pub fn display_name(&self) -> &str {
        let name = self.name.trim();
        if !name.is_empty() {
            return name;
        }
        self.email.split('@').next().unwrap_or(&self.email)
    }
}

/// Partial profile edit. `None` fields are left unchanged by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.avatar.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_stored_user() {
        let user: User = serde_json::from_str(r#"{"id":"1","email":"a@b.com","name":"a"}"#)
            .expect("Failed to parse user JSON");
        assert_eq!(user, User::new("1", "a@b.com", "a"));
    }

    #[test]
    fn test_parse_full_user() {
        let json = r#"{"id":"42","email":"jo@example.com","name":"Jo","avatar":"https://img/jo.png","createdAt":"2024-01-02T03:04:05Z","updatedAt":"2024-02-03T04:05:06Z"}"#;
        let user: User = serde_json::from_str(json).expect("Failed to parse user JSON");
        assert_eq!(user.avatar.as_deref(), Some("https://img/jo.png"));
        assert_eq!(
            user.created_at.map(|t| t.to_rfc3339()),
            Some("2024-01-02T03:04:05+00:00".to_string())
        );
    }

    #[test]
    fn test_serialize_skips_absent_fields() {
        let json = serde_json::to_string(&User::new("1", "a@b.com", "a")).unwrap();
        assert_eq!(json, r#"{"id":"1","email":"a@b.com","name":"a"}"#);
    }

    #[test]
    fn test_display_name_fallback() {
        assert_eq!(User::new("1", "jo@example.com", "Jo").display_name(), "Jo");
        assert_eq!(User::new("1", "jo@example.com", "  ").display_name(), "jo");
    }

    #[test]
    fn test_profile_update_is_empty() {
        assert!(ProfileUpdate::default().is_empty());
        let update = ProfileUpdate {
            name: Some("New".to_string()),
            avatar: None,
        };
        assert!(!update.is_empty());
        assert_eq!(serde_json::to_string(&update).unwrap(), r#"{"name":"New"}"#);
    }
}
