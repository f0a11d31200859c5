use serde::Serialize;

use super::User;

/// Where the session sits in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Startup read of the stored session has not finished
    Uninitialized,
    Anonymous,
    Authenticated,
}

/// In-memory session view. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionState {
    pub user: Option<User>,
    pub is_loading: bool,
    pub is_processing: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            user: None,
            is_loading: true,
            is_processing: false,
        }
    }
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn phase(&self) -> SessionPhase {
        if self.is_loading {
            SessionPhase::Uninitialized
        } else if self.user.is_some() {
            SessionPhase::Authenticated
        } else {
            SessionPhase::Anonymous
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_loading() {
        let state = SessionState::default();
        assert!(state.is_loading);
        assert!(!state.is_processing);
        assert!(!state.is_authenticated());
        assert_eq!(state.phase(), SessionPhase::Uninitialized);
    }

    #[test]
    fn test_phase_follows_user() {
        let mut state = SessionState {
            user: None,
            is_loading: false,
            is_processing: false,
        };
        assert_eq!(state.phase(), SessionPhase::Anonymous);

        state.user = Some(User::new("1", "a@b.com", "a"));
        assert!(state.is_authenticated());
        assert_eq!(state.phase(), SessionPhase::Authenticated);
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(SessionState::default()).unwrap();
        assert_eq!(json["isLoading"], true);
        assert_eq!(json["isProcessing"], false);
        assert!(json["user"].is_null());
    }
}
