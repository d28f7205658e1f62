//! Lock-free ring buffer building block shared by the FIFO Queue.

pub mod spsc;
