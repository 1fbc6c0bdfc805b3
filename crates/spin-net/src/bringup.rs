//! Readiness barrier over the independent bring-up steps of a session.

use std::fmt;

/// One step that must complete before the session is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Milestone {
    WebLogin,
    ChatLogin,
    FriendList,
    MailList,
    Prefs,
}

impl Milestone {
    pub const ALL: [Milestone; 5] = [
        Milestone::WebLogin,
        Milestone::ChatLogin,
        Milestone::FriendList,
        Milestone::MailList,
        Milestone::Prefs,
    ];

    fn bit(self) -> u8 {
        match self {
            Milestone::WebLogin => 1 << 0,
            Milestone::ChatLogin => 1 << 1,
            Milestone::FriendList => 1 << 2,
            Milestone::MailList => 1 << 3,
            Milestone::Prefs => 1 << 4,
        }
    }
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Milestone::WebLogin => "web login",
            Milestone::ChatLogin => "chat login",
            Milestone::FriendList => "friend list",
            Milestone::MailList => "mail list",
            Milestone::Prefs => "prefs",
        };
        f.write_str(s)
    }
}

/// Edge-triggered join over all [`Milestone`]s.
///
/// Marks are never cleared. [`ReadinessGate::mark`] reports `true` exactly
/// once: on the call that completes the set.
#[derive(Debug, Clone, Default)]
pub struct ReadinessGate {
    marked: u8,
    fired: bool,
}

impl ReadinessGate {
    const REQUIRED: u8 = 0b1_1111;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, milestone: Milestone) -> bool {
        self.marked |= milestone.bit();
        if self.fired || self.marked != Self::REQUIRED {
            return false;
        }
        self.fired = true;
        true
    }

    pub fn is_marked(&self, milestone: Milestone) -> bool {
        self.marked & milestone.bit() != 0
    }

    pub fn is_ready(&self) -> bool {
        self.fired
    }

    /// Milestones that have not completed yet.
    pub fn missing(&self) -> Vec<Milestone> {
        Milestone::ALL
            .into_iter()
            .filter(|m| !self.is_marked(*m))
            .collect()
    }
}
