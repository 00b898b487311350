//! Emulation state enumeration and its transition table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Back-test lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmulationState {
    #[default]
    Stopped,
    Starting,
    Started,
    Suspending,
    Suspended,
    Stopping,
}

impl EmulationState {
    /// Whether `self -> to` is a legal transition.
    ///
    /// ```text
    /// Stopped    -> Starting
    /// Starting   -> Started
    /// Started    -> Suspending | Stopping
    /// Suspending -> Suspended
    /// Suspended  -> Starting | Stopping
    /// Stopping   -> Stopped
    /// ```
    #[must_use]
    pub fn can_transition_to(self, to: EmulationState) -> bool {
        use EmulationState::*;
        matches!(
            (self, to),
            (Stopped, Starting)
                | (Starting, Started)
                | (Started, Suspending)
                | (Started, Stopping)
                | (Suspending, Suspended)
                | (Suspended, Starting)
                | (Suspended, Stopping)
                | (Stopping, Stopped)
        )
    }

    /// Numeric code for gauges.
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Stopped => 0,
            Self::Starting => 1,
            Self::Started => 2,
            Self::Suspending => 3,
            Self::Suspended => 4,
            Self::Stopping => 5,
        }
    }
}

impl fmt::Display for EmulationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Suspending => "suspending",
            Self::Suspended => "suspended",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EmulationState::*;

    const ALL: [EmulationState; 6] = [Stopped, Starting, Started, Suspending, Suspended, Stopping];

    #[test]
    fn test_legal_transitions() {
        assert!(Stopped.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Started));
        assert!(Started.can_transition_to(Suspending));
        assert!(Started.can_transition_to(Stopping));
        assert!(Suspending.can_transition_to(Suspended));
        assert!(Suspended.can_transition_to(Starting));
        assert!(Suspended.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
    }

    #[test]
    fn test_stopped_only_reachable_from_stopping() {
        for from in ALL {
            assert_eq!(from.can_transition_to(Stopped), from == Stopping, "{from}");
        }
    }

    #[test]
    fn test_transition_count() {
        let legal = ALL
            .iter()
            .flat_map(|a| ALL.iter().map(move |b| (*a, *b)))
            .filter(|(a, b)| a.can_transition_to(*b))
            .count();
        assert_eq!(legal, 8);
    }
}
