//! Device pairing: the current challenge and how it is displayed

mod broker;
mod render;

pub use broker::{PairingBroker, PairingChallenge, PairingView};
pub use render::{ChallengeRenderer, QrSvgRenderer, RenderError};
