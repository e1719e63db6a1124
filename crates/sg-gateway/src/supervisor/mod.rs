//! Connection lifecycle supervision
//!
//! - `machine`: the pure state transition table
//! - `backoff`: reconnect delay schedule and attempt budget
//! - `actor`: the task that owns the state and executes transitions

mod actor;
pub mod backoff;
pub mod machine;

pub use actor::{ConnectionSupervisor, SupervisorCommand, SupervisorError, SupervisorHandle};
pub use backoff::ExponentialBackoff;
pub use machine::{transition, Action, Input, Transition};
