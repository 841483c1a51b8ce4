//! Outcome of validating a peer message.

/// Whether a message was accepted, plus the misbehaviour score the sender
/// earned. The score is only a suggestion for the peer manager.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Verdict {
    pub accepted: bool,
    pub dos: u32,
}

impl Verdict {
    pub const fn accept() -> Self {
        Self {
            accepted: true,
            dos: 0,
        }
    }

    /// Dropped without blaming the sender.
    pub const fn reject() -> Self {
        Self {
            accepted: false,
            dos: 0,
        }
    }

    pub const fn penalize(dos: u32) -> Self {
        Self {
            accepted: false,
            dos,
        }
    }

    pub fn is_penalty(&self) -> bool {
        self.dos > 0
    }
}
