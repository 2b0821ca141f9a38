//! Replica-set role boundary.
//!
//! Replica-set coordination lives outside this crate; the refresher only
//! needs to ask "am I currently a secondary?". Role flips mid-tick are
//! possible, which is why the refresher re-checks after its catalogue
//! query.

use std::sync::atomic::{AtomicU8, Ordering};

/// Replica-set member state, as far as routing refresh cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    /// Serving writes; does not run the background refresher.
    Primary,
    /// Serving reads only; runs the background refresher.
    Secondary,
    /// Neither (startup, recovery, arbiter).
    Other,
}

impl MemberState {
    /// True for read-only members that refresh routing in the background.
    #[must_use]
    pub const fn is_secondary(self) -> bool {
        matches!(self, Self::Secondary)
    }
}

/// Read access to the member's current replica-set role.
pub trait ReplicaRole: Send + Sync {
    /// The member's state right now.
    fn member_state(&self) -> MemberState;
}

/// Role handle updated by the (external) replication coordinator and read
/// by the refresher.
#[derive(Debug, Default)]
pub struct SharedRole {
    state: AtomicU8,
}

const STATE_PRIMARY: u8 = 0;
const STATE_SECONDARY: u8 = 1;
const STATE_OTHER: u8 = 2;

impl SharedRole {
    /// Creates a handle in the given state.
    #[must_use]
    pub fn new(state: MemberState) -> Self {
        let role = Self::default();
        role.set(state);
        role
    }

    /// Publishes a role change.
    pub fn set(&self, state: MemberState) {
        let value = match state {
            MemberState::Primary => STATE_PRIMARY,
            MemberState::Secondary => STATE_SECONDARY,
            MemberState::Other => STATE_OTHER,
        };
        self.state.store(value, Ordering::Release);
    }
}

impl ReplicaRole for SharedRole {
    fn member_state(&self) -> MemberState {
        match self.state.load(Ordering::Acquire) {
            STATE_SECONDARY => MemberState::Secondary,
            STATE_PRIMARY => MemberState::Primary,
            _ => MemberState::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_flips() {
        let role = SharedRole::new(MemberState::Secondary);
        assert!(role.member_state().is_secondary());
        role.set(MemberState::Primary);
        assert_eq!(role.member_state(), MemberState::Primary);
        role.set(MemberState::Other);
        assert!(!role.member_state().is_secondary());
    }
}
