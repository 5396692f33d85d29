//! Push channel connection: the kameo actor and its client handle.

pub mod actor;
pub mod client;

pub use actor::{ConnectOutcome, PushConnectionActor, PushConnectionArgs};
pub use client::PushClient;
