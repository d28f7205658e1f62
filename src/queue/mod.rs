//! Inter-thread data passing: the bounded FIFO Queue and the N-Buffer
//! Queue, the two fixed-capacity channel types every other subsystem
//! (notably the Logger demonstrator) is built out of.

pub mod fifo;
pub mod nbuffer;

pub use fifo::Fifo;
pub use nbuffer::NBuffer;
