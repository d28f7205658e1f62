//! Synchronization primitives: the interrupt discipline critical sections,
//! the priority-inheriting mutex, and its condition variable.

pub mod critical;
pub mod condvar;
pub mod mutex;

pub use critical::{EnableWithinDisable, FastGlobalDisable, GlobalDisable, KernelPause};
pub use condvar::CondVar;
pub use mutex::Mutex;
