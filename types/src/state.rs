//! Activity state of a masternode identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a masternode sits in its lifecycle.
///
/// `OutpointSpent` is absorbing: once the collateral is gone, the identity
/// can only be removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MasternodeState {
    /// Announced, but the first ping is younger than the minimum ping interval.
    PreEnabled,
    Enabled,
    /// No ping within the expiration window.
    Expired,
    /// Collateral was spent.
    OutpointSpent,
    /// Protocol version below the network minimum.
    UpdateRequired,
    /// No watchdog vote while watchdog mode is active.
    WatchdogExpired,
    /// Silent for so long that a fresh announcement is needed.
    NewStartRequired,
    /// Proof-of-service score hit the maximum.
    PoseBan,
}

impl MasternodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreEnabled => "PRE_ENABLED",
            Self::Enabled => "ENABLED",
            Self::Expired => "EXPIRED",
            Self::OutpointSpent => "OUTPOINT_SPENT",
            Self::UpdateRequired => "UPDATE_REQUIRED",
            Self::WatchdogExpired => "WATCHDOG_EXPIRED",
            Self::NewStartRequired => "NEW_START_REQUIRED",
            Self::PoseBan => "POSE_BAN",
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled)
    }

    pub fn is_pre_enabled(&self) -> bool {
        matches!(self, Self::PreEnabled)
    }

    pub fn is_valid_for_payment(&self) -> bool {
        matches!(self, Self::Enabled)
    }

    /// States a remotely started node may be adopted from.
    pub fn is_valid_for_auto_start(&self) -> bool {
        matches!(
            self,
            Self::Enabled | Self::PreEnabled | Self::Expired | Self::WatchdogExpired
        )
    }

    /// States in which a missing ping during list sync leaves the state untouched.
    pub fn awaits_ping(&self) -> bool {
        matches!(
            self,
            Self::Expired | Self::WatchdogExpired | Self::NewStartRequired
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::OutpointSpent)
    }
}

impl fmt::Display for MasternodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_enabled_is_payable() {
        assert!(MasternodeState::Enabled.is_valid_for_payment());
        assert!(!MasternodeState::PreEnabled.is_valid_for_payment());
        assert!(!MasternodeState::WatchdogExpired.is_valid_for_payment());
    }

    #[test]
    fn auto_start_states() {
        assert!(MasternodeState::Expired.is_valid_for_auto_start());
        assert!(!MasternodeState::NewStartRequired.is_valid_for_auto_start());
        assert!(!MasternodeState::PoseBan.is_valid_for_auto_start());
    }

    #[test]
    fn status_strings() {
        assert_eq!(MasternodeState::NewStartRequired.to_string(), "NEW_START_REQUIRED");
        assert_eq!(MasternodeState::PoseBan.as_str(), "POSE_BAN");
    }
}
