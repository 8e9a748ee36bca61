//! Shared memory layout of a channel segment.
//!
//! This module defines the `repr(C)` structures that make up a channel's
//! segment. Every process maps the segment at its own address, so nothing in
//! here stores a pointer; structures refer to each other by offset.
//!
//! # Memory Layout
//!
//! ```text
//! +-------------------------------------------------------------------+
//! | NODE HEADER (256 bytes)                                           |
//! |   magic "FRAMEPIP", version, lifecycle state, geometry, period    |
//! |   capacity, payload size, sink pid, reader count, published count |
//! |   released semaphore (readers -> sink), region offsets            |
//! +-------------------------------------------------------------------+
//! | READER TABLE (MAX_READERS entries, 64 bytes each)                 |
//! |   Per reader: flags, pid, consumed, last index, ready semaphore   |
//! +-------------------------------------------------------------------+
//! | SLOT TABLE (capacity entries, 64 bytes each)                      |
//! |   Per slot: lock word, sample index, period, timestamp            |
//! +-------------------------------------------------------------------+
//! | PAYLOAD AREA (capacity buffers, 64-byte aligned stride)           |
//! +-------------------------------------------------------------------+
//! ```

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use framepipe_sync::ShmSemaphore;

use crate::geometry::Geometry;

// =============================================================================
// Constants
// =============================================================================

/// Magic bytes identifying a channel segment.
pub const MAGIC: [u8; 8] = *b"FRAMEPIP";

/// Current protocol version (major.minor packed into u32).
pub const PROTOCOL_VERSION: u32 = 1 << 16; // v1.0

/// Maximum number of readers attached to one channel.
pub const MAX_READERS: usize = 16;

/// Maximum number of in-flight payload slots.
pub const MAX_CAPACITY: u32 = 64;

/// Default number of payload slots: a single buffer overwritten in place.
pub const DEFAULT_CAPACITY: u32 = 1;

const STATE_UNBOUND: u32 = 0;
const STATE_BOUND: u32 = 1;
const STATE_DESTROYED: u32 = 2;

/// Reader entry is being initialized by a connecting reader.
pub const READER_FLAG_CLAIMED: u32 = 1 << 0;
/// Reader entry belongs to an attached reader and gates the sink.
pub const READER_FLAG_ACTIVE: u32 = 1 << 1;

/// Slot lock bit held by the sink while it mutates the slot.
pub const SLOT_WRITER: u32 = 1 << 31;

/// `last_index` value of a reader that has not read anything yet.
pub const NO_INDEX: u64 = u64::MAX;

/// Lifecycle of a channel as recorded in its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unbound,
    Bound,
    Destroyed,
}

impl NodeState {
    fn from_word(word: u32) -> Self {
        match word {
            STATE_BOUND => Self::Bound,
            STATE_DESTROYED => Self::Destroyed,
            _ => Self::Unbound,
        }
    }

    fn word(self) -> u32 {
        match self {
            Self::Unbound => STATE_UNBOUND,
            Self::Bound => STATE_BOUND,
            Self::Destroyed => STATE_DESTROYED,
        }
    }
}

// =============================================================================
// Node Header
// =============================================================================

/// Header at the start of a channel segment (256 bytes).
///
/// Everything except `state`, `sink_pid`, `attached_readers`, `published`
/// and `released` is written once by the sink before the state becomes
/// [`NodeState::Bound`] and is immutable afterwards.
#[repr(C, align(64))]
pub struct NodeHeader {
    /// Magic bytes: "FRAMEPIP".
    pub magic: [u8; 8],
    /// Protocol version (major.minor packed).
    pub version: u32,
    /// Lifecycle state word.
    pub state: AtomicU32,

    /// Encoded [`Geometry`].
    pub geometry: [u32; 4],
    /// Nominal sample period in nanoseconds.
    pub period_ns: u64,
    /// Number of payload slots.
    pub capacity: u32,
    pub _pad0: u32,
    /// Bytes per payload.
    pub payload_size: u64,
    /// Distance between consecutive payload buffers.
    pub slot_stride: u64,

    /// Process id of the sink.
    pub sink_pid: AtomicU32,
    /// Number of attached readers.
    pub attached_readers: AtomicU32,
    /// Number of completed publishes; the current sample is `published - 1`.
    pub published: AtomicU64,
    /// Posted by readers on every release and detach.
    pub released: ShmSemaphore,

    /// Offset to the reader table from start of segment.
    pub reader_table_offset: u64,
    /// Offset to the slot table from start of segment.
    pub slot_table_offset: u64,
    /// Offset to the payload area from start of segment.
    pub payload_offset: u64,
    /// Total segment size the sink created.
    pub total_size: u64,

    /// Padding to 256 bytes.
    pub _pad: [u8; 136],
}

const _: () = assert!(core::mem::size_of::<NodeHeader>() == 256);

impl NodeHeader {
    /// Initialize a header for a channel that is about to be bound.
    ///
    /// The state is left at [`NodeState::Unbound`]; the sink flips it once
    /// the tables are ready.
    pub fn init(&mut self, geometry: Geometry, period: Duration, offsets: &NodeOffsets) {
        self.magic = MAGIC;
        self.version = PROTOCOL_VERSION;
        self.state = AtomicU32::new(STATE_UNBOUND);
        self.geometry = geometry.to_words();
        self.period_ns = crate::envelope::duration_to_ns(period);
        self.capacity = offsets.capacity;
        self._pad0 = 0;
        self.payload_size = offsets.payload_size as u64;
        self.slot_stride = offsets.slot_stride as u64;
        self.sink_pid = AtomicU32::new(std::process::id());
        self.attached_readers = AtomicU32::new(0);
        self.published = AtomicU64::new(0);
        self.released.init(0);
        self.reader_table_offset = offsets.reader_table as u64;
        self.slot_table_offset = offsets.slot_table as u64;
        self.payload_offset = offsets.payload as u64;
        self.total_size = offsets.total as u64;
        self._pad = [0; 136];
    }

    /// Validate the header against the mapped length and recompute offsets.
    pub fn validate(&self, mapped_len: usize) -> Result<NodeOffsets, LayoutError> {
        if self.magic != MAGIC {
            return Err(LayoutError::InvalidMagic);
        }
        let major = self.version >> 16;
        let our_major = PROTOCOL_VERSION >> 16;
        if major != our_major {
            return Err(LayoutError::IncompatibleVersion {
                expected: PROTOCOL_VERSION,
                found: self.version,
            });
        }
        let geometry = self.geometry()?;
        let payload_size = geometry
            .payload_size()
            .ok_or(LayoutError::SizeOverflow("payload size"))?;
        if payload_size as u64 != self.payload_size {
            return Err(LayoutError::InvalidConfig(
                "payload size disagrees with geometry",
            ));
        }
        let offsets = NodeOffsets::calculate(self.capacity, payload_size)?;
        if offsets.reader_table as u64 != self.reader_table_offset
            || offsets.slot_table as u64 != self.slot_table_offset
            || offsets.payload as u64 != self.payload_offset
        {
            return Err(LayoutError::InvalidConfig("region offsets disagree"));
        }
        if mapped_len < offsets.total {
            return Err(LayoutError::SegmentTooSmall {
                required: offsets.total,
                found: mapped_len,
            });
        }
        Ok(offsets)
    }

    pub fn geometry(&self) -> Result<Geometry, LayoutError> {
        Geometry::from_words(self.geometry)
    }

    pub fn period(&self) -> Duration {
        Duration::from_nanos(self.period_ns)
    }

    #[inline]
    pub fn state(&self) -> NodeState {
        NodeState::from_word(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_state(&self, state: NodeState) {
        self.state.store(state.word(), Ordering::Release);
    }
}

// =============================================================================
// Reader Entry
// =============================================================================

/// Entry in the reader table (64 bytes).
///
/// Claimed by a connecting reader with a CAS on `flags`; written by that
/// reader only, except for `ready`, which the sink posts on every publish.
#[repr(C, align(64))]
pub struct ReaderEntry {
    /// Flags (CLAIMED, ACTIVE); zero means free.
    pub flags: AtomicU32,
    /// Process id of the reader.
    pub pid: AtomicU32,
    /// Index of the last released sample plus one.
    pub consumed: AtomicU64,
    /// Index of the last released sample, or [`NO_INDEX`].
    pub last_index: AtomicU64,
    /// Posted by the sink on every publish.
    pub ready: ShmSemaphore,
    /// Wall-clock attach time (nanos since UNIX epoch).
    pub attached_at: AtomicU64,
    /// Bumped on every claim, so a reused entry is told apart from the
    /// reader that held it before.
    pub generation: AtomicU64,
    pub _pad: [u8; 16],
}

const _: () = assert!(core::mem::size_of::<ReaderEntry>() == 64);

impl ReaderEntry {
    pub fn init(&mut self) {
        self.flags = AtomicU32::new(0);
        self.pid = AtomicU32::new(0);
        self.consumed = AtomicU64::new(0);
        self.last_index = AtomicU64::new(NO_INDEX);
        self.ready.init(0);
        self.attached_at = AtomicU64::new(0);
        self.generation = AtomicU64::new(0);
        self._pad = [0; 16];
    }

    /// Try to claim a free entry.
    pub fn try_claim(&self) -> bool {
        let claimed = self
            .flags
            .compare_exchange(0, READER_FLAG_CLAIMED, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok();
        if claimed {
            self.generation.fetch_add(1, Ordering::Relaxed);
        }
        claimed
    }

    /// Generation of the active reader in this entry, or `None` if free.
    pub fn active_generation(&self) -> Option<u64> {
        self.is_active()
            .then(|| self.generation.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.flags.load(Ordering::Acquire) & READER_FLAG_ACTIVE != 0
    }

    pub fn mark_active(&self) {
        self.flags.store(READER_FLAG_ACTIVE, Ordering::Release);
    }

    pub fn mark_free(&self) {
        self.flags.store(0, Ordering::Release);
    }
}

// =============================================================================
// Slot Header
// =============================================================================

/// Metadata for one payload slot (64 bytes).
///
/// `lock` holds [`SLOT_WRITER`] while the sink mutates the slot and otherwise
/// counts the readers currently holding it. The remaining fields are written
/// under the writer bit and read under a reader hold, so relaxed accesses
/// suffice; the lock word carries the ordering.
#[repr(C, align(64))]
pub struct SlotHeader {
    pub lock: AtomicU32,
    pub _pad0: u32,
    /// Sample index currently stored in the slot.
    pub index: AtomicU64,
    /// Period recorded for that sample (nanos).
    pub period_ns: AtomicU64,
    /// Publish time of that sample (nanos since UNIX epoch).
    pub timestamp_ns: AtomicU64,
    pub _pad: [u8; 32],
}

const _: () = assert!(core::mem::size_of::<SlotHeader>() == 64);

impl SlotHeader {
    pub fn init(&mut self) {
        self.lock = AtomicU32::new(0);
        self._pad0 = 0;
        self.index = AtomicU64::new(NO_INDEX);
        self.period_ns = AtomicU64::new(0);
        self.timestamp_ns = AtomicU64::new(0);
        self._pad = [0; 32];
    }

    /// Take the writer bit. Fails while any reader holds the slot.
    pub fn try_lock_write(&self) -> bool {
        self.lock
            .compare_exchange(0, SLOT_WRITER, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn unlock_write(&self) {
        self.lock.store(0, Ordering::Release);
    }

    /// Add a reader hold. Fails while the writer bit is set.
    pub fn try_lock_read(&self) -> bool {
        let mut current = self.lock.load(Ordering::Relaxed);
        loop {
            if current & SLOT_WRITER != 0 {
                return false;
            }
            match self.lock.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn unlock_read(&self) {
        self.lock.fetch_sub(1, Ordering::Release);
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors from layout validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("invalid magic bytes")]
    InvalidMagic,
    #[error(
        "incompatible version: expected {}.{}, found {}.{}",
        .expected >> 16, .expected & 0xFFFF, .found >> 16, .found & 0xFFFF
    )]
    IncompatibleVersion { expected: u32, found: u32 },
    #[error("segment too small: need {required} bytes, got {found}")]
    SegmentTooSmall { required: usize, found: usize },
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    #[error("invalid geometry words {0:?}")]
    InvalidGeometry([u32; 4]),
    #[error("segment size overflow ({0})")]
    SizeOverflow(&'static str),
}

// =============================================================================
// Layout Calculations
// =============================================================================

/// Offsets within a channel segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeOffsets {
    pub capacity: u32,
    pub payload_size: usize,
    pub reader_table: usize,
    pub slot_table: usize,
    pub payload: usize,
    pub slot_stride: usize,
    pub total: usize,
}

impl NodeOffsets {
    /// Calculate offsets for `capacity` slots of `payload_size` bytes.
    pub fn calculate(capacity: u32, payload_size: usize) -> Result<Self, LayoutError> {
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(LayoutError::InvalidConfig("capacity out of range"));
        }
        if payload_size == 0 {
            return Err(LayoutError::InvalidConfig("payload size must be > 0"));
        }

        let header_size = core::mem::size_of::<NodeHeader>();
        let reader_size = core::mem::size_of::<ReaderEntry>();
        let slot_size = core::mem::size_of::<SlotHeader>();

        let reader_table = header_size;
        let slot_table = reader_table + MAX_READERS * reader_size;
        let payload = slot_table + capacity as usize * slot_size;
        let slot_stride = align_up(payload_size, 64).ok_or(LayoutError::SizeOverflow("stride"))?;
        let total = slot_stride
            .checked_mul(capacity as usize)
            .and_then(|area| area.checked_add(payload))
            .ok_or(LayoutError::SizeOverflow("payload area"))?;

        Ok(Self {
            capacity,
            payload_size,
            reader_table,
            slot_table,
            payload,
            slot_stride,
            total,
        })
    }

    #[inline]
    pub fn reader_entry(&self, reader: usize) -> usize {
        self.reader_table + reader * core::mem::size_of::<ReaderEntry>()
    }

    #[inline]
    pub fn slot_header(&self, slot: u32) -> usize {
        self.slot_table + slot as usize * core::mem::size_of::<SlotHeader>()
    }

    #[inline]
    pub fn slot_payload(&self, slot: u32) -> usize {
        self.payload + slot as usize * self.slot_stride
    }

    /// Slot that holds sample `index`.
    #[inline]
    pub fn slot_for(&self, index: u64) -> u32 {
        (index % self.capacity as u64) as u32
    }
}

#[inline]
fn align_up(value: usize, align: usize) -> Option<usize> {
    Some(value.checked_add(align - 1)? & !(align - 1))
}
