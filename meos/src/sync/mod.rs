//! Blocking synchronization primitives.
//!
//! Everything here is built from two ingredients supplied by the layers
//! below: the busy-waiting [`SpinLock`](bedrock::SpinLock), which disables
//! preemption while held, and the [`WaitChannel`], which atomically
//! releases a held spinlock, parks the calling thread, and supports
//! wake-one and wake-all.
//!
//! The primitives may block, so **callers in interrupt context must not
//! use them**; this is asserted on every blocking entry point.
//!
//! | primitive | blocking | release discipline |
//! |---|---|---|
//! | [`Semaphore`] | `p` blocks while the count is zero | `v` |
//! | [`Mutex`] | `lock` blocks while held | explicit [`MutexGuard::unlock`] |
//! | [`ConditionVariable`] | `wait` releases the mutex and sleeps | (none) |
//! | [`RwLock`] | readers queue behind writers (writer-preferring) | guard drop |

pub mod condvar;
pub mod mutex;
pub mod rwlock;
pub mod semaphore;
pub mod wchan;

pub use condvar::ConditionVariable;
pub use mutex::{Mutex, MutexGuard};
pub use rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use semaphore::Semaphore;
pub use wchan::WaitChannel;
