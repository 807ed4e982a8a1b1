pub mod chain;
pub mod clock;
pub mod election;
pub mod error;
pub mod genesis;
pub mod import;
pub mod node;
pub mod storage;

pub use chain::{CacheRound, Chain, ChainState, FinalRound};
pub use clock::{Clock, MockClock, SystemClock};
pub use error::KernelError;
pub use node::Node;
