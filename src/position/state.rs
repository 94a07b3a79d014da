//! Position lifecycle states

use serde::Serialize;
use std::fmt;

/// Position state
///
/// `WaitingEntry -> Open -> Closed`, or `WaitingEntry -> Closed` when the
/// entry is canceled before any fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PositionState {
    WaitingEntry,
    Open,
    Closed,
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PositionState::WaitingEntry => "WAITING_ENTRY",
            PositionState::Open => "OPEN",
            PositionState::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// Strategy callback owed after an order event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionSignal {
    EnterOk,
    EnterCanceled,
    ExitOk,
    ExitCanceled,
}
