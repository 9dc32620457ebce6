//! # Session Lifecycle
//!
//! The state machine every sale tab moves through.
//!
//! ## Transition Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Session State Machine                              │
//! │                                                                         │
//! │        ┌──────── suspend ────────►┐                                    │
//! │   ┌────┴───┐                ┌─────▼─────┐                              │
//! │   │ Active │◄─── resume ────┤ Suspended │                              │
//! │   └─┬─┬──┬─┘                └──┬──┬──┬──┘                              │
//! │     │ │  │                     │  │  │                                  │
//! │     │ │  └── complete ─────────┼──┼──┼──► Completed  (terminal)        │
//! │     │ └───── close ────────────┼──┘  │                                  │
//! │     │                          ▼     │                                  │
//! │     │                      Cancelled │    (terminal)                    │
//! │     └──────── expiry sweep ──────────┴──► Expired    (terminal)        │
//! │                                                                         │
//! │   No edge leaves Completed, Cancelled or Expired. Any mutation         │
//! │   against a terminal session fails with StaleSession.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle state of a sale session (tab).
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Tab is open and editable.
    Active,
    /// Tab is parked; still editable, still counts against the quota.
    Suspended,
    /// Committed to a permanent Sale. Terminal.
    Completed,
    /// Closed without completion. Terminal.
    Cancelled,
    /// Swept by the inactivity cleanup. Terminal.
    Expired,
}

impl SessionState {
    /// Terminal states admit no further transition or mutation.
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Expired
        )
    }

    /// Open states are the ones counted against the per-(user,device) quota.
    #[inline]
    pub const fn is_open(&self) -> bool {
        matches!(self, SessionState::Active | SessionState::Suspended)
    }

    /// Lowercase database/text representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Suspended => "suspended",
            SessionState::Completed => "completed",
            SessionState::Cancelled => "cancelled",
            SessionState::Expired => "expired",
        }
    }

    /// Whether an edge `self → to` exists in the transition table.
    pub const fn can_transition_to(&self, to: SessionState) -> bool {
        match (self, to) {
            (SessionState::Active, SessionState::Suspended) => true,
            (SessionState::Suspended, SessionState::Active) => true,
            (SessionState::Active | SessionState::Suspended, SessionState::Completed) => true,
            (SessionState::Active | SessionState::Suspended, SessionState::Cancelled) => true,
            (SessionState::Active | SessionState::Suspended, SessionState::Expired) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Transition Validation
// =============================================================================

/// Validates a lifecycle transition, returning the typed failure a caller
/// can surface.
///
/// Terminal origins always fail with `StaleSession`; a missing edge between
/// live states fails with `InvalidTransition`.
pub fn validate_transition(
    session_id: &str,
    from: SessionState,
    to: SessionState,
) -> CoreResult<()> {
    if from.is_terminal() {
        return Err(CoreError::StaleSession {
            session_id: session_id.to_string(),
            state: from.to_string(),
        });
    }

    if !from.can_transition_to(to) {
        return Err(CoreError::InvalidTransition {
            session_id: session_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    Ok(())
}

/// Gate for item/calculation mutations: only `Active` and `Suspended`
/// sessions may change.
pub fn ensure_mutable(session_id: &str, state: SessionState) -> CoreResult<()> {
    if state.is_terminal() {
        return Err(CoreError::StaleSession {
            session_id: session_id.to_string(),
            state: state.to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SessionState; 5] = [
        SessionState::Active,
        SessionState::Suspended,
        SessionState::Completed,
        SessionState::Cancelled,
        SessionState::Expired,
    ];

    #[test]
    fn test_active_and_suspended_toggle() {
        assert!(SessionState::Active.can_transition_to(SessionState::Suspended));
        assert!(SessionState::Suspended.can_transition_to(SessionState::Active));
    }

    #[test]
    fn test_open_states_reach_all_terminals() {
        for open in [SessionState::Active, SessionState::Suspended] {
            assert!(open.can_transition_to(SessionState::Completed));
            assert!(open.can_transition_to(SessionState::Cancelled));
            assert!(open.can_transition_to(SessionState::Expired));
        }
    }

    #[test]
    fn test_no_edge_leaves_terminal_states() {
        for terminal in [
            SessionState::Completed,
            SessionState::Cancelled,
            SessionState::Expired,
        ] {
            for to in ALL {
                assert!(!terminal.can_transition_to(to), "{terminal} -> {to}");
            }
        }
    }

    #[test]
    fn test_self_transitions_rejected() {
        for state in ALL {
            assert!(!state.can_transition_to(state), "{state} -> {state}");
        }
    }

    #[test]
    fn test_validate_transition_from_terminal_is_stale() {
        let err = validate_transition("s-1", SessionState::Completed, SessionState::Active)
            .unwrap_err();
        assert!(matches!(err, CoreError::StaleSession { .. }));
    }

    #[test]
    fn test_validate_transition_missing_edge() {
        // Active -> Active has no edge but Active is not terminal
        let err =
            validate_transition("s-1", SessionState::Active, SessionState::Active).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[test]
    fn test_ensure_mutable() {
        assert!(ensure_mutable("s-1", SessionState::Active).is_ok());
        assert!(ensure_mutable("s-1", SessionState::Suspended).is_ok());

        for terminal in [
            SessionState::Completed,
            SessionState::Cancelled,
            SessionState::Expired,
        ] {
            let err = ensure_mutable("s-1", terminal).unwrap_err();
            assert!(matches!(err, CoreError::StaleSession { .. }));
        }
    }

    #[test]
    fn test_as_str_round_trip_with_serde() {
        for state in ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
            let back: SessionState = serde_json::from_str(&json).unwrap();
            assert_eq!(back, state);
        }
    }
}
