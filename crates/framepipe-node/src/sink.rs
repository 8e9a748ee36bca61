//! The writer side of a channel.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crate::envelope::{SampleMeta, duration_to_ns, wall_clock};
use crate::error::NodeError;
use crate::geometry::Geometry;
use crate::layout::{LayoutError, MAX_READERS, NO_INDEX, NodeHeader, NodeOffsets, NodeState};
use crate::options::{NodeOptions, WAIT_SLICE};
use crate::segment::{ShmSegment, process_alive, segment_path, validate_name};
use crate::view::NodeView;

/// How many times an existing segment's header is probed before it is
/// declared stale.
const STALE_PROBES: u32 = 5;

/// The single writer of a channel.
///
/// A sink starts unbound. [`NodeSink::bind`] creates the segment and makes
/// the channel visible to sources; every sample is then written inside a
/// [`NodeSink::reserve_for_write`] / [`WriteGuard::publish`] bracket.
/// Dropping the sink destroys the channel.
pub struct NodeSink {
    options: NodeOptions,
    bound: Option<BoundSink>,
}

struct BoundSink {
    name: String,
    geometry: Geometry,
    period: Duration,
    view: NodeView,
    next_index: u64,
    segment: ShmSegment,
}

impl NodeSink {
    pub fn new() -> Self {
        Self::with_options(NodeOptions::default())
    }

    pub fn with_options(options: NodeOptions) -> Self {
        Self {
            options,
            bound: None,
        }
    }

    /// Create channel `name` carrying `geometry` samples every `period`.
    ///
    /// A leftover segment from a sink that no longer exists is removed and
    /// replaced. A segment owned by a live sink is [`NodeError::NameInUse`].
    pub fn bind(
        &mut self,
        name: &str,
        geometry: Geometry,
        period: Duration,
    ) -> Result<(), NodeError> {
        if let Some(bound) = &self.bound {
            return Err(NodeError::AlreadyBound(bound.name.clone()));
        }
        validate_name(name)?;

        let payload_size = geometry
            .payload_size()
            .ok_or_else(|| NodeError::layout(name, LayoutError::SizeOverflow("payload size")))?;
        let offsets = NodeOffsets::calculate(self.options.capacity, payload_size)
            .map_err(|e| NodeError::layout(name, e))?;

        let segment = create_exclusive(name, &segment_path(name), offsets.total)?;
        // SAFETY: the segment was just created with `offsets.total` bytes and
        // nobody else can have mapped an unbound channel's tables yet.
        let view = unsafe {
            let view = NodeView::new(segment.region(), offsets);
            view.init(geometry, period);
            view
        };
        view.header().set_state(NodeState::Bound);

        tracing::info!(
            channel = name,
            %geometry,
            period_ms = period.as_secs_f64() * 1000.0,
            capacity = offsets.capacity,
            "channel bound"
        );

        self.bound = Some(BoundSink {
            name: name.to_string(),
            geometry,
            period,
            view,
            next_index: 0,
            segment,
        });
        Ok(())
    }

    /// Wait until the next sample's slot may be overwritten, then take it.
    ///
    /// Blocks while any attached reader still owes a release that the slot
    /// depends on. Fails with [`NodeError::Interrupted`] if the options'
    /// interrupt fires while waiting.
    pub fn reserve_for_write(&mut self) -> Result<WriteGuard<'_>, NodeError> {
        let interrupt = &self.options.interrupt;
        let stall_warning = self.options.stall_warning;
        let bound = self.bound.as_mut().ok_or(NodeError::NotBound)?;

        let view = bound.view;
        let index = bound.next_index;
        let offsets = view.offsets();
        let floor = (index + 1).saturating_sub(offsets.capacity as u64);
        let slot_no = offsets.slot_for(index);
        let slot = view.slot(slot_no);
        let header = view.header();

        // Readers that attach while the sink waits do not join the wait.
        let gating = latch_readers(&view);

        let started = Instant::now();
        let mut warned = false;
        loop {
            header.released.drain();
            if lagging_readers(&view, &gating, floor) == 0 && slot.try_lock_write() {
                break;
            }
            if interrupt.is_triggered() {
                return Err(NodeError::Interrupted);
            }
            if !warned && started.elapsed() >= stall_warning {
                tracing::warn!(
                    channel = %bound.name,
                    index,
                    readers = lagging_readers(&view, &gating, floor),
                    "sink stalled waiting for readers to release"
                );
                warned = true;
            }
            header.released.wait_timeout(WAIT_SLICE);
        }

        // Whatever the slot held is about to be overwritten.
        slot.index.store(NO_INDEX, Ordering::Relaxed);

        let waited = started.elapsed();
        if warned {
            tracing::info!(channel = %bound.name, index, ?waited, "sink resumed");
        }

        let period = bound.period;
        Ok(WriteGuard {
            sink: bound,
            slot: slot_no,
            index,
            period,
            published: false,
        })
    }

    /// Invalidate the channel for every attached reader and remove its name.
    ///
    /// Readers get the samples already published, then
    /// [`NodeError::ChannelClosed`]. Calling this on an unbound sink does
    /// nothing.
    pub fn destroy(&mut self) -> Result<(), NodeError> {
        let Some(bound) = self.bound.take() else {
            return Ok(());
        };
        let header = bound.view.header();
        header.set_state(NodeState::Destroyed);
        for reader in bound.view.readers() {
            if reader.is_active() {
                reader.ready.post();
            }
        }
        tracing::info!(
            channel = %bound.name,
            published = bound.next_index,
            readers = header.attached_readers.load(Ordering::Acquire),
            "channel destroyed"
        );
        bound
            .segment
            .unlink()
            .map_err(|e| NodeError::io(&bound.name, "removing segment", e))
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    pub fn name(&self) -> Option<&str> {
        self.bound.as_ref().map(|b| b.name.as_str())
    }

    pub fn geometry(&self) -> Option<Geometry> {
        self.bound.as_ref().map(|b| b.geometry)
    }

    pub fn period(&self) -> Option<Duration> {
        self.bound.as_ref().map(|b| b.period)
    }

    /// Number of samples published so far; also the index of the next one.
    pub fn published(&self) -> u64 {
        self.bound.as_ref().map_or(0, |b| b.next_index)
    }

    /// Number of sources currently attached.
    pub fn attached_readers(&self) -> u32 {
        self.bound.as_ref().map_or(0, |b| {
            b.view.header().attached_readers.load(Ordering::Acquire)
        })
    }

    pub fn options(&self) -> &NodeOptions {
        &self.options
    }
}

impl Default for NodeSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NodeSink {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            tracing::warn!(error = %e, "failed to destroy channel");
        }
    }
}

impl std::fmt::Debug for NodeSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSink")
            .field("name", &self.name())
            .field("geometry", &self.geometry())
            .field("published", &self.published())
            .finish()
    }
}

/// Exclusive write access to the next sample's slot.
///
/// [`WriteGuard::publish`] makes the sample visible. Dropping the guard
/// without publishing abandons the write: the slot is unlocked, the index is
/// not consumed, and readers are not signalled.
pub struct WriteGuard<'a> {
    sink: &'a mut BoundSink,
    slot: u32,
    index: u64,
    period: Duration,
    published: bool,
}

impl WriteGuard<'_> {
    /// Index the sample will carry once published.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        // SAFETY: the guard holds the slot's writer bit.
        unsafe { self.sink.view.payload_mut(self.slot) }
    }

    /// Override the period recorded for this sample.
    pub fn set_period(&mut self, period: Duration) {
        self.period = period;
    }

    /// Make the sample visible to every reader.
    pub fn publish(mut self) -> SampleMeta {
        let view = self.sink.view;
        let slot = view.slot(self.slot);
        let meta = SampleMeta {
            index: self.index,
            period: self.period,
            timestamp: wall_clock(),
        };

        slot.index.store(meta.index, Ordering::Relaxed);
        slot.period_ns.store(duration_to_ns(meta.period), Ordering::Relaxed);
        slot.timestamp_ns
            .store(duration_to_ns(meta.timestamp), Ordering::Relaxed);
        slot.unlock_write();

        let header = view.header();
        header.published.store(meta.index + 1, Ordering::SeqCst);
        let mut signalled = 0;
        for reader in view.readers() {
            if reader.is_active() {
                reader.ready.post();
                signalled += 1;
            }
        }

        self.sink.next_index += 1;
        self.published = true;
        tracing::debug!(
            channel = %self.sink.name,
            index = meta.index,
            readers = signalled,
            "published"
        );
        meta
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.sink.view.slot(self.slot).unlock_write();
            tracing::debug!(channel = %self.sink.name, index = self.index, "write abandoned");
        }
    }
}

/// Generations of the readers attached right now, by entry.
fn latch_readers(view: &NodeView) -> [Option<u64>; MAX_READERS] {
    let mut gating = [None; MAX_READERS];
    for (latched, reader) in gating.iter_mut().zip(view.readers()) {
        *latched = reader.active_generation();
    }
    gating
}

/// Number of latched readers, still attached, that have not yet released
/// sample `floor - 1`.
fn lagging_readers(view: &NodeView, gating: &[Option<u64>; MAX_READERS], floor: u64) -> usize {
    view.readers()
        .zip(gating)
        .filter(|(r, latched)| {
            latched.is_some()
                && r.active_generation() == **latched
                && r.consumed.load(Ordering::Acquire) < floor
        })
        .count()
}

/// Create the segment file, replacing a stale one left by a dead sink.
fn create_exclusive(name: &str, path: &Path, len: usize) -> Result<ShmSegment, NodeError> {
    for _ in 0..3 {
        match ShmSegment::create(path, len) {
            Ok(segment) => return Ok(segment),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => match live_owner(path) {
                Some(pid) => {
                    return Err(NodeError::NameInUse {
                        name: name.to_string(),
                        pid,
                    });
                }
                None => {
                    tracing::warn!(
                        channel = name,
                        path = %path.display(),
                        "removing stale segment"
                    );
                    match fs::remove_file(path) {
                        Err(e) if e.kind() != io::ErrorKind::NotFound => {
                            return Err(NodeError::io(name, "removing stale segment", e));
                        }
                        _ => {}
                    }
                }
            },
            Err(e) => return Err(NodeError::io(name, "creating segment", e)),
        }
    }
    Err(NodeError::io(
        name,
        "creating segment",
        io::Error::from(io::ErrorKind::AlreadyExists),
    ))
}

/// Pid of the live sink bound to the segment at `path`, if there is one.
///
/// A header that is not yet valid may belong to a sink that is still
/// initializing, so it is probed a few times before giving up on it.
fn live_owner(path: &Path) -> Option<u32> {
    for _ in 0..STALE_PROBES {
        match ShmSegment::open(path, size_of::<NodeHeader>()) {
            Ok(segment) => {
                // SAFETY: the mapping covers a full header; fields are only
                // trusted after validation.
                let region = segment.region();
                let header = unsafe { region.get::<NodeHeader>(0) };
                if header.validate(segment.len()).is_ok() {
                    match header.state() {
                        NodeState::Bound => {
                            let pid = header.sink_pid.load(Ordering::Acquire);
                            return process_alive(pid).then_some(pid);
                        }
                        NodeState::Destroyed => return None,
                        NodeState::Unbound => {}
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(_) => {}
        }
        std::thread::sleep(WAIT_SLICE);
    }
    None
}
