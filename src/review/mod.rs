//! Interactive review session: the state machine, its three decision flows,
//! and the bridge that lets the classification engine wait on a human.

pub mod batch;
pub mod bridge;
pub mod classifier;
pub mod direction;
pub mod keys;
pub mod message;
pub mod orchestrator;

pub use bridge::{Bridge, ReviewHandler};
pub use message::{Command, Msg};
pub use orchestrator::Orchestrator;
