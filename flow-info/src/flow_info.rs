// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FlowInfoError {
    #[error("no such flow action {0}")]
    NoSuchAction(u8),
}

/// Stable index of a flow in the flow table arena.
///
/// The flow table owns flow lifetime; everything else refers to flows by index only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowIndex(pub u32);

impl Display for FlowIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "flow#{}", self.0)
    }
}

/// Slot of a flow in the kernel flow table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowHandle(pub u32);

impl FlowHandle {
    pub const INVALID: FlowHandle = FlowHandle(u32::MAX);

    #[must_use]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl Default for FlowHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Forwarding action the data plane applies to a flow.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    #[default]
    Pass = 0,
    Deny = 1,
    Drop = 2,
    Nat = 3,
}

impl TryFrom<u8> for FlowAction {
    type Error = FlowInfoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FlowAction::Pass),
            1 => Ok(FlowAction::Deny),
            2 => Ok(FlowAction::Drop),
            3 => Ok(FlowAction::Nat),
            v => Err(FlowInfoError::NoSuchAction(v)),
        }
    }
}

impl From<FlowAction> for u8 {
    fn from(action: FlowAction) -> Self {
        action as u8
    }
}

impl Display for FlowAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowAction::Pass => write!(f, "pass"),
            FlowAction::Deny => write!(f, "deny"),
            FlowAction::Drop => write!(f, "drop"),
            FlowAction::Nat => write!(f, "nat"),
        }
    }
}

/// Wall-clock time in microseconds since the epoch.
///
/// All setup, teardown and last-modified stamps of the engine use this unit.
#[must_use]
pub fn utc_usec() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_action_from_u8() {
        for action in [
            FlowAction::Pass,
            FlowAction::Deny,
            FlowAction::Drop,
            FlowAction::Nat,
        ] {
            assert_eq!(FlowAction::try_from(u8::from(action)), Ok(action));
        }
        assert_eq!(
            FlowAction::try_from(9),
            Err(FlowInfoError::NoSuchAction(9))
        );
    }

    #[test]
    fn invalid_handle() {
        assert!(!FlowHandle::default().is_valid());
        assert!(FlowHandle(7).is_valid());
    }

    #[test]
    fn clock_is_in_microseconds() {
        // 2020-01-01 in µs; any sane clock is past it
        assert!(utc_usec() > 1_577_836_800_000_000);
    }
}
