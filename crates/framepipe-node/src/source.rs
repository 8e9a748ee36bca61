//! The reader side of a channel.

use std::io;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crate::envelope::{Sample, SampleMeta, duration_to_ns, wall_clock};
use crate::error::NodeError;
use crate::geometry::Geometry;
use crate::interrupt::Interrupt;
use crate::layout::{MAX_READERS, NO_INDEX, NodeHeader, NodeOffsets, NodeState};
use crate::options::{NodeOptions, WAIT_SLICE};
use crate::segment::{ShmSegment, process_alive, segment_path, validate_name};
use crate::view::NodeView;

const MIN_BACKOFF: Duration = Duration::from_millis(1);
const MAX_BACKOFF: Duration = Duration::from_millis(100);

/// One reader of a channel.
///
/// A source sees every sample published after it attached, in order and
/// without gaps, plus the sample that was current when it attached.
/// Dropping the source detaches it.
pub struct NodeSource {
    name: String,
    geometry: Geometry,
    period: Duration,
    entry: usize,
    view: NodeView,
    interrupt: Interrupt,
    /// Next sample this reader is owed.
    next: u64,
    last_index: Option<u64>,
    received: u64,
    segment: ShmSegment,
}

impl NodeSource {
    /// Attach to channel `name` with default options, accepting any geometry.
    pub fn connect(name: &str) -> Result<Self, NodeError> {
        Self::connect_with(name, None, &NodeOptions::default())
    }

    /// Attach to channel `name`, waiting for its sink to bind.
    ///
    /// Retries with exponential backoff until `options.connect_timeout`
    /// elapses. If `expected` is given, the channel's geometry must match it.
    pub fn connect_with(
        name: &str,
        expected: Option<Geometry>,
        options: &NodeOptions,
    ) -> Result<Self, NodeError> {
        validate_name(name)?;
        let path = segment_path(name);
        let started = Instant::now();
        let deadline = started + options.connect_timeout;
        let mut backoff = MIN_BACKOFF;

        let (segment, offsets) = loop {
            if let Some(found) = try_open_bound(name, &path)? {
                break found;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(NodeError::ChannelNotFound {
                    name: name.to_string(),
                    waited: started.elapsed(),
                });
            }
            tracing::trace!(channel = name, ?backoff, "channel not bound yet");
            if !options.interrupt.sleep(backoff.min(deadline - now)) {
                return Err(NodeError::Interrupted);
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        };

        // SAFETY: try_open_bound validated the header against the mapping.
        let view = unsafe { NodeView::new(segment.region(), offsets) };
        let header = view.header();
        let geometry = header.geometry().map_err(|e| NodeError::layout(name, e))?;
        if let Some(expected) = expected
            && expected != geometry
        {
            return Err(NodeError::GeometryMismatch {
                name: name.to_string(),
                expected,
                found: geometry,
            });
        }

        let entry = (0..MAX_READERS)
            .find(|&i| view.reader(i).try_claim())
            .ok_or_else(|| NodeError::TooManyReaders(name.to_string()))?;
        let reader = view.reader(entry);
        reader.pid.store(std::process::id(), Ordering::Relaxed);
        reader.last_index.store(NO_INDEX, Ordering::Relaxed);
        reader
            .attached_at
            .store(duration_to_ns(wall_clock()), Ordering::Relaxed);
        reader.ready.drain();
        // The current sample is owed to this reader, unless an abandoned or
        // in-progress write has already wiped its slot.
        let published = header.published.load(Ordering::SeqCst);
        let next = match published.checked_sub(1) {
            Some(current) if holds(&view, current) => current,
            _ => published,
        };
        reader.consumed.store(next, Ordering::SeqCst);
        reader.mark_active();
        let readers = header.attached_readers.fetch_add(1, Ordering::AcqRel) + 1;

        tracing::info!(
            channel = name,
            %geometry,
            entry,
            readers,
            published,
            "source attached"
        );

        Ok(Self {
            name: name.to_string(),
            geometry,
            period: header.period(),
            entry,
            view,
            interrupt: options.interrupt.clone(),
            next,
            last_index: None,
            received: 0,
            segment,
        })
    }

    /// Wait for the next sample this reader has not seen and take a read
    /// hold on it.
    ///
    /// The first call returns the sample that was current when the reader
    /// attached, or the first one published after that. If the sink raced
    /// ahead and already recycled it, the newest sample is returned instead.
    /// Once the sink is gone and every sample owed to this reader has been
    /// delivered, returns [`NodeError::ChannelClosed`].
    pub fn acquire_for_read(&mut self) -> Result<ReadGuard<'_>, NodeError> {
        let view = self.view;
        let header = view.header();
        let reader = view.reader(self.entry);

        loop {
            reader.ready.drain();
            let published = header.published.load(Ordering::SeqCst);

            if self.next < published {
                let index = self.next;
                if let Some(meta) = self.try_hold(index) {
                    tracing::trace!(channel = %self.name, index, "acquired");
                    return Ok(ReadGuard {
                        slot: view.offsets().slot_for(index),
                        meta,
                        source: self,
                        released: false,
                    });
                }
                // Only a reader that has not released anything can lose a
                // sample; everything later is held back by its `consumed`.
                if self.last_index.is_none() {
                    let newest = published - 1;
                    if newest > index {
                        tracing::debug!(
                            channel = %self.name,
                            missed = index,
                            newest,
                            "first sample recycled, skipping to newest"
                        );
                        self.next = newest;
                        reader.consumed.store(newest, Ordering::SeqCst);
                        continue;
                    }
                    // The owed sample is gone and nothing newer exists yet:
                    // stop gating the sink and wait for the next publish.
                    tracing::debug!(
                        channel = %self.name,
                        missed = index,
                        "first sample overwritten, waiting for the next"
                    );
                    self.next = published;
                    reader.consumed.store(published, Ordering::SeqCst);
                    header.released.post();
                    continue;
                }
            }

            if self.sink_gone() {
                tracing::debug!(
                    channel = %self.name,
                    received = self.received,
                    "channel closed by sink"
                );
                return Err(NodeError::ChannelClosed(self.name.clone()));
            }
            if self.interrupt.is_triggered() {
                return Err(NodeError::Interrupted);
            }
            reader.ready.wait_timeout(WAIT_SLICE);
        }
    }

    /// Take a read hold on the slot of `index`, if it still holds that sample.
    fn try_hold(&self, index: u64) -> Option<SampleMeta> {
        let slot = self.view.slot(self.view.offsets().slot_for(index));
        if !slot.try_lock_read() {
            return None;
        }
        if slot.index.load(Ordering::Relaxed) != index {
            // Recycled before a first read got to it, or an abandoned write.
            slot.unlock_read();
            return None;
        }
        Some(SampleMeta {
            index,
            period: Duration::from_nanos(slot.period_ns.load(Ordering::Relaxed)),
            timestamp: Duration::from_nanos(slot.timestamp_ns.load(Ordering::Relaxed)),
        })
    }

    fn sink_gone(&self) -> bool {
        let header = self.view.header();
        header.state() != NodeState::Bound
            || !process_alive(header.sink_pid.load(Ordering::Relaxed))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Nominal period the sink bound the channel with.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Index of the last sample this reader released.
    pub fn last_index(&self) -> Option<u64> {
        self.last_index
    }

    /// Number of samples this reader has released.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Number of samples the sink has published so far.
    pub fn published(&self) -> u64 {
        self.view.header().published.load(Ordering::Acquire)
    }

    pub fn segment_path(&self) -> &Path {
        self.segment.path()
    }
}

impl Drop for NodeSource {
    fn drop(&mut self) {
        let header = self.view.header();
        self.view.reader(self.entry).mark_free();
        header.attached_readers.fetch_sub(1, Ordering::AcqRel);
        header.released.post();
        tracing::info!(
            channel = %self.name,
            entry = self.entry,
            received = self.received,
            "source detached"
        );
    }
}

impl std::fmt::Debug for NodeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSource")
            .field("name", &self.name)
            .field("geometry", &self.geometry)
            .field("entry", &self.entry)
            .field("last_index", &self.last_index)
            .finish()
    }
}

/// Read access to one published sample.
///
/// The sink cannot overwrite the slot while the guard is alive. Dropping the
/// guard releases it, same as [`ReadGuard::release`].
pub struct ReadGuard<'a> {
    source: &'a mut NodeSource,
    slot: u32,
    meta: SampleMeta,
    released: bool,
}

impl ReadGuard<'_> {
    pub fn meta(&self) -> &SampleMeta {
        &self.meta
    }

    pub fn index(&self) -> u64 {
        self.meta.index
    }

    pub fn payload(&self) -> &[u8] {
        // SAFETY: the guard holds a read hold on the slot.
        unsafe { self.source.view.payload(self.slot) }
    }

    pub fn sample(&self) -> Sample<'_> {
        Sample::new(self.meta, self.payload())
    }

    /// Tell the sink this reader is done with the sample.
    pub fn release(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let view = self.source.view;
        let index = self.meta.index;
        view.slot(self.slot).unlock_read();
        let reader = view.reader(self.source.entry);
        reader.last_index.store(index, Ordering::Relaxed);
        reader.consumed.store(index + 1, Ordering::SeqCst);
        view.header().released.post();

        self.source.next = index + 1;
        self.source.last_index = Some(index);
        self.source.received += 1;
    }
}

impl std::fmt::Debug for ReadGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadGuard")
            .field("channel", &self.source.name)
            .field("slot", &self.slot)
            .field("meta", &self.meta)
            .finish()
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Whether sample `index` is still stored in its slot.
fn holds(view: &NodeView, index: u64) -> bool {
    view.slot(view.offsets().slot_for(index))
        .index
        .load(Ordering::Relaxed)
        == index
}

/// Map the segment at `path` if its channel is bound by a live sink.
///
/// `Ok(None)` means "not there yet": no file, a file still being sized, an
/// unbound or destroyed channel, or one whose sink died.
fn try_open_bound(
    name: &str,
    path: &Path,
) -> Result<Option<(ShmSegment, NodeOffsets)>, NodeError> {
    let segment = match ShmSegment::open(path, size_of::<NodeHeader>()) {
        Ok(segment) => segment,
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::UnexpectedEof
            ) =>
        {
            return Ok(None);
        }
        Err(e) => return Err(NodeError::io(name, "opening segment", e)),
    };

    // SAFETY: the mapping covers a full header.
    let region = segment.region();
    let header = unsafe { region.get::<NodeHeader>(0) };
    if header.state() != NodeState::Bound
        || !process_alive(header.sink_pid.load(Ordering::Acquire))
    {
        return Ok(None);
    }
    let offsets = header
        .validate(segment.len())
        .map_err(|e| NodeError::layout(name, e))?;
    Ok(Some((segment, offsets)))
}
