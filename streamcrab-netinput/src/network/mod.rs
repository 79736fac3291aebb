//! Wire-level pieces of the input path: frame codec, per-channel chunk queues and
//! the async transport adapter.

pub mod channel;
pub mod frame;
pub mod transport;

pub use channel::*;
pub use frame::*;
pub use transport::*;
