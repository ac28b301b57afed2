use std::fmt;

use serde::Serialize;

/// Lifecycle of a camera session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    #[default]
    Uninitialized,
    Initialized,
    Previewing,
    Recording,
    Disposed,
}

impl SessionState {
    /// Initialized or further along; the camera pipeline exists.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Initialized | Self::Previewing | Self::Recording)
    }

    /// Whether `self -> to` is a legal step. States are never skipped.
    pub fn can_transition(self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Uninitialized | Disposed, Initialized)
                | (Initialized, Previewing)
                | (Previewing, Initialized | Recording)
                | (Recording, Previewing)
                | (Uninitialized | Initialized | Previewing | Recording, Disposed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Previewing => "previewing",
            Self::Recording => "recording",
            Self::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn forward_path_is_legal() {
        assert!(Uninitialized.can_transition(Initialized));
        assert!(Initialized.can_transition(Previewing));
        assert!(Previewing.can_transition(Recording));
        assert!(Recording.can_transition(Previewing));
        assert!(Previewing.can_transition(Initialized));
    }

    #[test]
    fn states_are_not_skipped() {
        assert!(!Uninitialized.can_transition(Previewing));
        assert!(!Initialized.can_transition(Recording));
        assert!(!Recording.can_transition(Initialized));
        assert!(!Disposed.can_transition(Previewing));
    }

    #[test]
    fn dispose_from_anywhere_then_reinitialize() {
        for state in [Uninitialized, Initialized, Previewing, Recording] {
            assert!(state.can_transition(Disposed), "{state}");
        }
        assert!(!Disposed.can_transition(Disposed));
        assert!(Disposed.can_transition(Initialized));
    }

    #[test]
    fn active_states() {
        assert!(!Uninitialized.is_active());
        assert!(Recording.is_active());
        assert!(!Disposed.is_active());
    }
}
