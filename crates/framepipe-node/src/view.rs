//! Typed access to a mapped channel segment.

use std::time::Duration;

use framepipe_sync::Region;

use crate::geometry::Geometry;
use crate::layout::{MAX_READERS, NodeHeader, NodeOffsets, ReaderEntry, SlotHeader};

/// A validated view of a channel segment.
///
/// Holders keep the backing [`ShmSegment`](crate::segment::ShmSegment) alive
/// for as long as the view is used.
#[derive(Clone, Copy)]
pub(crate) struct NodeView {
    region: Region,
    offsets: NodeOffsets,
}

impl NodeView {
    /// # Safety
    ///
    /// `region` must map a segment whose header was initialized with
    /// `offsets` and validated against the mapped length.
    pub(crate) unsafe fn new(region: Region, offsets: NodeOffsets) -> Self {
        Self { region, offsets }
    }

    #[inline]
    pub(crate) fn offsets(&self) -> &NodeOffsets {
        &self.offsets
    }

    #[inline]
    pub(crate) fn header(&self) -> &NodeHeader {
        unsafe { self.region.get(0) }
    }

    #[inline]
    pub(crate) fn reader(&self, reader: usize) -> &ReaderEntry {
        unsafe { self.region.get(self.offsets.reader_entry(reader)) }
    }

    pub(crate) fn readers(&self) -> impl Iterator<Item = &ReaderEntry> {
        (0..MAX_READERS).map(|i| self.reader(i))
    }

    #[inline]
    pub(crate) fn slot(&self, slot: u32) -> &SlotHeader {
        unsafe { self.region.get(self.offsets.slot_header(slot)) }
    }

    /// Payload bytes of `slot`.
    ///
    /// # Safety
    ///
    /// The caller holds a read hold on the slot's lock.
    pub(crate) unsafe fn payload(&self, slot: u32) -> &[u8] {
        unsafe {
            self.region
                .bytes(self.offsets.slot_payload(slot), self.offsets.payload_size)
        }
    }

    /// Mutable payload bytes of `slot`.
    ///
    /// # Safety
    ///
    /// The caller holds the slot's writer bit.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn payload_mut(&self, slot: u32) -> &mut [u8] {
        unsafe {
            self.region
                .bytes_mut(self.offsets.slot_payload(slot), self.offsets.payload_size)
        }
    }

    /// Initialize the header and every table of a freshly created segment.
    /// The channel is left unbound.
    ///
    /// # Safety
    ///
    /// No other process may have the segment mapped yet.
    pub(crate) unsafe fn init(&self, geometry: Geometry, period: Duration) {
        unsafe { self.region.get_mut::<NodeHeader>(0) }.init(geometry, period, &self.offsets);
        for i in 0..MAX_READERS {
            unsafe { self.region.get_mut::<ReaderEntry>(self.offsets.reader_entry(i)) }.init();
        }
        for slot in 0..self.offsets.capacity {
            unsafe { self.region.get_mut::<SlotHeader>(self.offsets.slot_header(slot)) }.init();
        }
    }
}
