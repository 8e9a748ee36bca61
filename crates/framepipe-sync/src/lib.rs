//! Synchronization primitives that live inside shared memory.
//!
//! Everything in this crate is designed to be placed at a fixed offset of a
//! memory-mapped segment and used concurrently by several processes that map
//! the same segment at different addresses. Nothing here stores a pointer in
//! shared memory; only plain integers and atomics.
//!
//! # Primitives
//!
//! - [`Region`]: an unowned view of a mapped block, addressed by offset.
//! - [`ShmSemaphore`]: a process-shared counting semaphore backed by a futex word.
//!
//! # Loom Testing
//!
//! Enable the `loom` feature for concurrency verification of the semaphore's
//! permit accounting.
//!
//! ```text
//! cargo test -p framepipe-sync --features loom
//! ```

#![no_std]

#[cfg(any(test, feature = "alloc"))]
extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

#[cfg(all(feature = "std", not(feature = "loom")))]
pub mod futex;
pub mod region;
pub mod semaphore;
pub mod sync;

#[cfg(any(test, feature = "alloc"))]
pub use region::HeapRegion;
pub use region::Region;
pub use semaphore::ShmSemaphore;

#[cfg(all(test, feature = "loom"))]
mod loom_tests;
