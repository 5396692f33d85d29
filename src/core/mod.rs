pub mod frame;
pub mod message;
pub mod reconnect;
pub mod types;

pub use frame::*;
pub use message::*;
pub use reconnect::*;
pub use types::*;
