//! Connection state transition table
//!
//! `transition` is a pure function from (state, input) to the next state
//! plus the ordered side effects the supervisor must perform. It knows
//! nothing about transports, timers or storage, so every legal transition
//! can be enumerated and tested on its own.
//!
//! | State                 | Input                         | Next         | Actions |
//! |-----------------------|-------------------------------|--------------|---------|
//! | Disconnected          | Start                         | Connecting   | ResetBackoff, Connect |
//! | Connecting            | ReconnectDue                  | Connecting   | Connect |
//! | Connecting            | Challenge                     | Connecting   | StoreChallenge |
//! | Connecting            | Opened                        | Connected    | ClearChallenge, ResetBackoff |
//! | Connecting, Connected | Closed (retry allowed)        | Connecting   | ClearChallenge, ScheduleReconnect |
//! | Connecting, Connected | Closed (retries exhausted)    | Disconnected | CancelReconnect, ClearChallenge |
//! | Connecting, Connected | Closed (logged out)           | Disconnected | CancelReconnect, ClearChallenge, EraseCredentials |
//! | Connecting, Connected | CredentialsUpdated            | unchanged    | PersistCredentials |
//! | Connecting, Connected | Logout                        | Disconnected | CancelReconnect, InvalidateGeneration, LogoutTransport, CloseTransport, ClearChallenge, EraseCredentials |
//! | Disconnected          | Logout                        | Disconnected | CancelReconnect, ClearChallenge, EraseCredentials |
//! | any                   | Shutdown                      | Disconnected | CancelReconnect, InvalidateGeneration, CloseTransport, ClearChallenge, Stop |
//!
//! Every other pair leaves the state unchanged with no actions.

use sg_core::{ConnectionState, CredentialsUpdate};

/// Something the supervisor reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Process start or operator request to (re)pair
    Start,
    /// The pending reconnect timer fired
    ReconnectDue,
    /// Transport produced a new pairing challenge
    Challenge { payload: String },
    /// Transport session authenticated
    Opened,
    /// Transport authentication material changed
    CredentialsUpdated(CredentialsUpdate),
    /// Transport socket closed
    Closed {
        reason: String,
        logged_out: bool,
        /// Whether the reconnect budget still allows another attempt
        retry_allowed: bool,
    },
    /// Operator logout
    Logout,
    /// Process shutdown
    Shutdown,
}

impl Input {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Input::Start => "start",
            Input::ReconnectDue => "reconnect_due",
            Input::Challenge { .. } => "challenge",
            Input::Opened => "opened",
            Input::CredentialsUpdated(_) => "credentials_updated",
            Input::Closed { .. } => "closed",
            Input::Logout => "logout",
            Input::Shutdown => "shutdown",
        }
    }
}

/// Side effect requested by a transition, executed in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Open a new transport socket under a fresh generation
    Connect,
    /// Hand the challenge payload to the pairing broker
    StoreChallenge,
    /// Drop any pairing challenge
    ClearChallenge,
    /// Arm the reconnect timer unless one is already pending
    ScheduleReconnect,
    /// Disarm the reconnect timer
    CancelReconnect,
    /// Restore the initial backoff delay and attempt budget
    ResetBackoff,
    /// Merge the update into the in-memory credentials and persist them
    PersistCredentials,
    /// Forget credentials in memory and on disk
    EraseCredentials,
    /// Ask the platform to invalidate the session
    LogoutTransport,
    /// Tear down the live socket
    CloseTransport,
    /// Bump the generation so events from the current socket are ignored
    InvalidateGeneration,
    /// Stop the supervisor loop
    Stop,
}

/// Outcome of applying an input to a state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// State after the input
    pub next: ConnectionState,
    /// Side effects, in execution order
    pub actions: Vec<Action>,
}

impl Transition {
    fn to(next: ConnectionState, actions: &[Action]) -> Self {
        Self {
            next,
            actions: actions.to_vec(),
        }
    }

    fn ignore(state: ConnectionState) -> Self {
        Self {
            next: state,
            actions: Vec::new(),
        }
    }

    /// True when the input had no effect
    pub fn is_noop(&self, from: ConnectionState) -> bool {
        self.next == from && self.actions.is_empty()
    }
}

/// Apply `input` to `state`
pub fn transition(state: ConnectionState, input: &Input) -> Transition {
    use Action::*;
    use ConnectionState::*;

    let live = matches!(state, Connecting | Connected);

    match input {
        Input::Start if state == Disconnected => {
            Transition::to(Connecting, &[ResetBackoff, Connect])
        }
        Input::ReconnectDue if state == Connecting => Transition::to(Connecting, &[Connect]),
        Input::Challenge { .. } if state == Connecting => {
            Transition::to(Connecting, &[StoreChallenge])
        }
        Input::Opened if state == Connecting => {
            Transition::to(Connected, &[ClearChallenge, ResetBackoff])
        }
        Input::Closed {
            logged_out: true, ..
        } if live => Transition::to(
            Disconnected,
            &[CancelReconnect, ClearChallenge, EraseCredentials],
        ),
        Input::Closed {
            retry_allowed: true,
            ..
        } if live => Transition::to(Connecting, &[ClearChallenge, ScheduleReconnect]),
        Input::Closed { .. } if live => {
            Transition::to(Disconnected, &[CancelReconnect, ClearChallenge])
        }
        Input::CredentialsUpdated(_) if live => Transition::to(state, &[PersistCredentials]),
        Input::Logout if live => Transition::to(
            Disconnected,
            &[
                CancelReconnect,
                InvalidateGeneration,
                LogoutTransport,
                CloseTransport,
                ClearChallenge,
                EraseCredentials,
            ],
        ),
        Input::Logout => Transition::to(
            Disconnected,
            &[CancelReconnect, ClearChallenge, EraseCredentials],
        ),
        Input::Shutdown => Transition::to(
            Disconnected,
            &[
                CancelReconnect,
                InvalidateGeneration,
                CloseTransport,
                ClearChallenge,
                Stop,
            ],
        ),
        _ => Transition::ignore(state),
    }
}
