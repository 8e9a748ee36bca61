//! Shared memory channels between pipeline stages.
//!
//! A channel ("node") has exactly one writer, the [`NodeSink`], and any number
//! of readers, the [`NodeSource`]s, each usually in its own process. Samples
//! live in fixed slots of a named shared segment; a semaphore handshake makes
//! sure no reader sees a half-written sample and the sink never overwrites a
//! slot a reader has not released.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use framepipe_node::{Geometry, NodeSink, NodeSource, PixelColor};
//!
//! # fn main() -> Result<(), framepipe_node::NodeError> {
//! let mut sink = NodeSink::new();
//! sink.bind("camera", Geometry::frame(480, 640, PixelColor::Bgr), Duration::from_millis(33))?;
//!
//! let mut source = NodeSource::connect("camera")?;
//!
//! let mut write = sink.reserve_for_write()?;
//! write.payload_mut().fill(0x80);
//! write.publish();
//!
//! let read = source.acquire_for_read()?;
//! assert_eq!(read.index(), 0);
//! read.release();
//! # Ok(())
//! # }
//! ```

mod envelope;
mod error;
mod geometry;
mod interrupt;
pub mod layout;
mod options;
mod record;
pub mod segment;
mod sink;
mod source;
mod view;

pub use envelope::{Sample, SampleMeta};
pub use error::NodeError;
pub use geometry::{Geometry, ParseColorError, PixelColor};
pub use interrupt::Interrupt;
pub use layout::{DEFAULT_CAPACITY, LayoutError, MAX_CAPACITY, MAX_READERS};
pub use options::NodeOptions;
pub use record::{Position2D, RecordError};
pub use sink::{NodeSink, WriteGuard};
pub use source::{NodeSource, ReadGuard};
