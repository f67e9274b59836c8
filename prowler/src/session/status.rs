use serde::{Deserialize, Serialize};

/// Externally visible session state.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Not polling. Initial and terminal state.
    #[default]
    Stopped,
    /// Polling on schedule.
    Running,
    /// Worker alive, iterations skipped.
    Paused,
}

impl SessionStatus {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, target),
            (Stopped, Running) | (Running, Paused) | (Paused, Running) | (Running | Paused, Stopped)
        )
    }

    /// A worker exists for this session.
    #[inline]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use SessionStatus::*;
        assert!(Stopped.can_transition_to(Running));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Paused.can_transition_to(Stopped));
        assert!(Running.can_transition_to(Stopped));

        assert!(!Stopped.can_transition_to(Paused));
        assert!(!Stopped.can_transition_to(Stopped));
        assert!(!Running.can_transition_to(Running));
        assert!(!Paused.can_transition_to(Paused));
    }

    #[test]
    fn test_display_and_flags() {
        assert_eq!(SessionStatus::Paused.to_string(), "PAUSED");
        assert_eq!("RUNNING".parse::<SessionStatus>().unwrap(), SessionStatus::Running);
        assert!(SessionStatus::Paused.is_running());
        assert!(SessionStatus::Paused.is_paused());
        assert!(!SessionStatus::Stopped.is_running());
    }
}
